//! Terminal rendering of deploy events and the final report.

use crate::report::{DeployEvent, Failure, Outcome, RestoreReport, StepStatus};
use std::io::{self, IsTerminal, Write};

const WIDTH: usize = 80;

pub struct Progress<W: Write> {
    out: W,
    total: usize,
    done: usize,
    color: bool,
}

impl Progress<io::Stdout> {
    pub fn stdout(total: usize) -> Self {
        let out = io::stdout();
        let color = out.is_terminal();
        Self::new(out, total, color)
    }
}

impl<W: Write> Progress<W> {
    pub fn new(out: W, total: usize, color: bool) -> Self {
        Self {
            out,
            total,
            done: 0,
            color,
        }
    }

    pub fn handle(&mut self, event: &DeployEvent<'_>) {
        let line = match event {
            DeployEvent::Section(title) => format!("\n{}\n", title_line(title)),
            DeployEvent::Started(_) => return,
            DeployEvent::Finished {
                message,
                status,
                counted,
            } => {
                if *counted {
                    self.done += 1;
                }
                step_line(self.done, self.total, message, *status, self.color)
            }
        };
        // A closed stdout must not abort the restore.
        let _ = writeln!(self.out, "{line}");
    }
}

pub fn title_line(title: &str) -> String {
    format!("{:-^WIDTH$}", format!(" {title} "))
}

pub fn step_line(done: usize, total: usize, message: &str, status: StepStatus, color: bool) -> String {
    let width = total.max(1).to_string().len();
    let counter = format!("[{done:>width$}/{total}]");
    let text = format!("{counter} {message} ");
    let padded = if text.chars().count() < WIDTH {
        format!("{text:.<WIDTH$}")
    } else {
        text
    };
    format!("{padded} {}", symbol(status, color))
}

fn symbol(status: StepStatus, color: bool) -> String {
    let (glyph, code) = match status {
        StepStatus::Success => ('\u{2714}', "92"),
        StepStatus::Deferred | StepStatus::Warning => ('\u{2b58}', "93"),
        StepStatus::Failure => ('\u{2716}', "31"),
    };
    if color {
        format!("\x1b[{code}m{glyph}\x1b[0m")
    } else {
        glyph.to_string()
    }
}

pub fn print_summary(report: &RestoreReport) {
    print!("{}", summary(report));
}

pub fn summary(report: &RestoreReport) -> String {
    let mut out = String::new();
    let deployed = report.deployed().count();
    let failed = report.failed().count();

    out.push_str(&format!("\n{}\n\n", title_line("Summary")));
    out.push_str(&format!(
        "Destination org: {}\nDeployed: {deployed}  Failed: {failed}  Replayed: {}\n",
        report.destination_org_id, report.replayed
    ));

    if report.is_clean() {
        out.push_str("All objects restored.\n");
    }

    let rejected: Vec<String> = report
        .failed()
        .filter_map(|object| match &object.outcome {
            Outcome::Failed(Failure::Api { message }) => Some(format!(
                "  {}: {}",
                owner(&object.object_type, &object.name),
                message.lines().next().unwrap_or_default()
            )),
            Outcome::Failed(Failure::MissingScope { owner: site }) => Some(format!(
                "  {}: site {site} was not created",
                owner(&object.object_type, &object.name)
            )),
            _ => None,
        })
        .collect();
    if !rejected.is_empty() {
        out.push_str("\nFailed objects:\n");
        for line in rejected {
            out.push_str(&line);
            out.push('\n');
        }
    }

    let mut unresolved = report.unresolved().peekable();
    if unresolved.peek().is_some() {
        out.push_str("\nUnresolved references:\n");
        for (object, references) in unresolved {
            let ids: Vec<String> = references
                .iter()
                .map(|r| format!("{} = {}", r.field, r.old_id))
                .collect();
            out.push_str(&format!(
                "  {}: {}\n",
                owner(&object.object_type, &object.name),
                ids.join(", ")
            ));
        }
    }

    if !report.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for warning in &report.warnings {
            out.push_str(&format!("  {}: {}\n", warning.owner, warning.message));
        }
    }
    out
}

fn owner(object_type: &str, name: &str) -> String {
    if name.is_empty() {
        object_type.to_string()
    } else {
        format!("{object_type} {name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AssetWarning, ObjectReport};
    use crate::rewrite::UnresolvedReference;

    #[test]
    fn pads_steps_to_a_fixed_width() {
        let line = step_line(3, 42, "Creating sites \"HQ\"", StepStatus::Success, false);
        assert!(line.starts_with("[ 3/42] Creating sites \"HQ\" ..."));
        assert!(line.ends_with('\u{2714}'));
        assert_eq!(line.chars().count(), WIDTH + 2);
    }

    #[test]
    fn counts_only_counted_events() {
        let mut out = Vec::new();
        let mut progress = Progress::new(&mut out, 2, false);
        progress.handle(&DeployEvent::Section("Deploying Org"));
        progress.handle(&DeployEvent::Started("Creating wlans \"a\""));
        progress.handle(&DeployEvent::Finished {
            message: "Creating wlans \"a\"",
            status: StepStatus::Deferred,
            counted: false,
        });
        progress.handle(&DeployEvent::Finished {
            message: "Creating wlans \"a\"",
            status: StepStatus::Success,
            counted: true,
        });

        drop(progress);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(" Deploying Org "));
        assert!(text.contains("[0/2] Creating wlans"));
        assert!(text.contains("[1/2] Creating wlans"));
    }

    #[test]
    fn summary_lists_failures_and_warnings() {
        let report = RestoreReport {
            destination_org_id: "org-new".into(),
            objects: vec![ObjectReport {
                object_type: "wlans".into(),
                name: "\"guest\"".into(),
                scope: None,
                old_id: None,
                attempts: 2,
                outcome: Outcome::Failed(Failure::Unresolved {
                    references: vec![UnresolvedReference {
                        field: "template_id".into(),
                        old_id: "11111111-1111-1111-1111-111111111111".into(),
                    }],
                }),
            }],
            warnings: vec![AssetWarning {
                owner: "wlans \"guest\"".into(),
                message: "portal image not found".into(),
            }],
            replayed: 1,
        };

        let text = summary(&report);
        assert!(text.contains("Deployed: 0  Failed: 1  Replayed: 1"));
        assert!(text.contains("template_id = 11111111-1111-1111-1111-111111111111"));
        assert!(!text.contains("Failed objects:"));
        assert!(text.contains("Unresolved references:"));
        assert!(text.contains("wlans \"guest\": template_id"));
        assert!(text.contains("portal image not found"));
        assert!(!text.contains("All objects restored."));
    }
}
