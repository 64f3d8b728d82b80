use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

/// Name recorded for students who have left; such entries are never shown.
const WITHDRAWN: &str = "[抹消]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub number: u32,
    pub name: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub reading: String,
}

/// Student roster: `{ "07": ["Full Name", "Reading"], ... }`.
pub struct Roster {
    entries: HashMap<String, Vec<String>>,
}

impl Roster {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read roster {:?}", path))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries = serde_json::from_str(raw)
            .context("Roster is not a number → [name, reading] map")?;
        Ok(Self { entries })
    }

    /// Look up comma/space separated numbers, in input order. Leading zeros
    /// and trailing junk on a token are ignored; tokens without digits are skipped.
    pub fn find(&self, input: &str) -> Vec<Student> {
        input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(|token| {
                let digits: String = token
                    .trim()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits.parse::<u32>().ok()
            })
            .filter_map(|number| self.student(number))
            .collect()
    }

    fn student(&self, number: u32) -> Option<Student> {
        let fields = self.entries.get(&format!("{:02}", number))?;
        let name = fields.first()?.trim().to_string();
        if name == WITHDRAWN {
            return None;
        }
        let reading = fields.get(1).cloned().unwrap_or_default();

        let (first_name, last_name) = match name.split_once(char::is_whitespace) {
            Some((first, rest)) if !rest.trim().is_empty() => {
                let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
                (first.to_string(), Some(rest))
            }
            _ => (name.clone(), None),
        };

        Some(Student {
            number,
            name,
            first_name,
            last_name,
            reading,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Default,
    NumberOnly,
    NameOnly,
    ReadingOnly,
    NumberName,
    NameReading,
    NumberReading,
    FirstLast,
    AllInfo,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 9] = [
        DisplayMode::Default,
        DisplayMode::NumberOnly,
        DisplayMode::NameOnly,
        DisplayMode::ReadingOnly,
        DisplayMode::NumberName,
        DisplayMode::NameReading,
        DisplayMode::NumberReading,
        DisplayMode::FirstLast,
        DisplayMode::AllInfo,
    ];

    /// Select-menu value.
    pub fn value(self) -> &'static str {
        match self {
            DisplayMode::Default => "default",
            DisplayMode::NumberOnly => "number_only",
            DisplayMode::NameOnly => "name_only",
            DisplayMode::ReadingOnly => "reading_only",
            DisplayMode::NumberName => "number_name",
            DisplayMode::NameReading => "name_reading",
            DisplayMode::NumberReading => "number_reading",
            DisplayMode::FirstLast => "first_last",
            DisplayMode::AllInfo => "all_info",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisplayMode::Default => "Number, name, reading",
            DisplayMode::NumberOnly => "Number only",
            DisplayMode::NameOnly => "Name only",
            DisplayMode::ReadingOnly => "Reading only",
            DisplayMode::NumberName => "Number and name",
            DisplayMode::NameReading => "Name and reading",
            DisplayMode::NumberReading => "Number and reading",
            DisplayMode::FirstLast => "First and last name",
            DisplayMode::AllInfo => "Everything",
        }
    }

    /// Unknown values fall back to the default view.
    pub fn parse(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|m| m.value() == value)
            .unwrap_or(DisplayMode::Default)
    }

    fn line(self, s: &Student) -> String {
        let split_name = match &s.last_name {
            Some(last) => format!("{} {}", s.first_name, last),
            None => s.first_name.clone(),
        };
        match self {
            DisplayMode::Default => format!("No. {} {} ({})", s.number, s.name, s.reading),
            DisplayMode::NumberOnly => format!("No. {}", s.number),
            DisplayMode::NameOnly => s.name.clone(),
            DisplayMode::ReadingOnly => s.reading.clone(),
            DisplayMode::NumberName => format!("No. {} {}", s.number, s.name),
            DisplayMode::NameReading => format!("{} ({})", s.name, s.reading),
            DisplayMode::NumberReading => format!("No. {} {}", s.number, s.reading),
            DisplayMode::FirstLast => split_name,
            DisplayMode::AllInfo => format!("No. {} {} ({})", s.number, split_name, s.reading),
        }
    }
}

pub fn format_students(students: &[Student], mode: DisplayMode) -> String {
    let mut out = format!("**<{}>**\n", mode.label());
    for student in students {
        out.push_str(&mode.line(student));
        out.push('\n');
    }
    let noun = if students.len() == 1 { "student" } else { "students" };
    out.push_str(&format!("\n{} {} found", students.len(), noun));
    out
}
