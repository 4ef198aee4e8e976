//! Run merging
//!
//! Word processors split text into runs at every formatting change, spell
//! check mark or undo step, so a single `{{customer.name}}` frequently ends
//! up spread over several runs. Merging coalesces consecutive text runs so
//! directives can be found in one piece.

use docfill_ooxml::{Hyperlink, Paragraph, ParagraphChild, Run, Space};

/// Merge consecutive text-only runs of a paragraph.
///
/// The result is a new paragraph; the input is not touched. Merged runs keep
/// the first run's properties. A run holding both a break and text is split
/// into a break run and a text run first. Merging is scoped to each hyperlink
/// and to the plain-run spans between hyperlinks and verbatim children.
pub fn merge_consecutive_runs(paragraph: &Paragraph) -> Paragraph {
    let mut children = Vec::with_capacity(paragraph.children.len());
    let mut span: Vec<Run> = Vec::new();

    for child in &paragraph.children {
        match child {
            ParagraphChild::Run(run) => span.push(run.clone()),
            ParagraphChild::Hyperlink(link) => {
                flush(&mut span, &mut children);
                children.push(ParagraphChild::Hyperlink(Hyperlink {
                    id: link.id.clone(),
                    anchor: link.anchor.clone(),
                    runs: merge_runs(&link.runs),
                }));
            }
            ParagraphChild::Raw(raw) => {
                flush(&mut span, &mut children);
                children.push(ParagraphChild::Raw(raw.clone()));
            }
        }
    }
    flush(&mut span, &mut children);

    Paragraph {
        properties: paragraph.properties.clone(),
        children,
    }
}

fn flush(span: &mut Vec<Run>, children: &mut Vec<ParagraphChild>) {
    if span.is_empty() {
        return;
    }
    children.extend(merge_runs(span).into_iter().map(ParagraphChild::Run));
    span.clear();
}

/// Merge a sequence of runs that share a parent
pub fn merge_runs(runs: &[Run]) -> Vec<Run> {
    let mut merged: Vec<Run> = Vec::with_capacity(runs.len());

    for run in runs {
        if run.brk.is_some() && run.text.is_some() && run.objects.is_none() {
            let mut text_run = run.clone();
            text_run.brk = None;
            merged.push(Run {
                text: None,
                ..run.clone()
            });
            push_merged(&mut merged, text_run);
        } else {
            push_merged(&mut merged, run.clone());
        }
    }

    merged
}

fn push_merged(merged: &mut Vec<Run>, run: Run) {
    if let Some(last) = merged.last_mut() {
        if last.is_text_only() && run.is_text_only() {
            if let (Some(into), Some(from)) = (last.text.as_mut(), run.text) {
                into.content.push_str(&from.content);
                if from.space == Space::Preserve {
                    into.space = Space::Preserve;
                }
            }
            return;
        }
    }
    merged.push(run);
}
