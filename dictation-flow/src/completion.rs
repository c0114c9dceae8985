//! Completion status derived from a [`Record`].
//!
//! Nothing here is stored: every value is a pure function of the record and is
//! safe to recompute after each merge.

use std::fmt;

use serde::Serialize;

use crate::record::{Record, Section, SectionKind};

/// Completed vs. total fields of one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SectionProgress {
    pub completed: usize,
    pub total: usize,
}

impl SectionProgress {
    /// Percentage in `[0, 100]`. A section without fields is at 0.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

pub fn section_progress(section: &Section) -> SectionProgress {
    SectionProgress {
        completed: section
            .fields()
            .iter()
            .filter(|field| field.value.is_complete())
            .count(),
        total: section.fields().len(),
    }
}

/// Unknown fields are never complete.
pub fn is_field_complete(section: &Section, field: &str) -> bool {
    section.get(field).is_some_and(|value| value.is_complete())
}

pub fn field_display_value(section: &Section, field: &str) -> String {
    section
        .get(field)
        .map(|value| value.display())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCompletion {
    pub name: &'static str,
    pub complete: bool,
    /// Rendered value, present only once the field is complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionCompletion {
    pub section: SectionKind,
    pub label: &'static str,
    #[serde(flatten)]
    pub progress: SectionProgress,
    pub percent: f64,
    pub fields: Vec<FieldCompletion>,
}

impl SectionCompletion {
    fn of(section: &Section) -> Self {
        let progress = section_progress(section);
        let fields = section
            .fields()
            .iter()
            .map(|field| {
                let complete = field.value.is_complete();
                FieldCompletion {
                    name: field.name,
                    complete,
                    display: complete.then(|| field.value.display()),
                }
            })
            .collect();
        Self {
            section: section.kind(),
            label: section.kind().label(),
            progress,
            percent: progress.percent(),
            fields,
        }
    }
}

impl fmt::Display for SectionCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.1}% complete, {} / {} items completed",
            self.label, self.percent, self.progress.completed, self.progress.total
        )
    }
}

/// Completion of every section, in record order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionSnapshot {
    pub sections: Vec<SectionCompletion>,
}

impl CompletionSnapshot {
    pub fn of(record: &Record) -> Self {
        Self {
            sections: record.sections().map(SectionCompletion::of).collect(),
        }
    }

    pub fn section(&self, kind: SectionKind) -> Option<&SectionCompletion> {
        self.sections.iter().find(|section| section.section == kind)
    }

    pub fn is_complete(&self) -> bool {
        self.sections
            .iter()
            .all(|section| section.progress.completed == section.progress.total)
    }
}
