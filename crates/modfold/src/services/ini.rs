//! Structure-preserving INI merge.
//!
//! The merge rule for `IniOverwrite`/`IniAdd` needs an INI collaborator that
//! keeps everything it does not understand byte-for-byte: comments, blank
//! lines, key spelling, section order. [`StructuredIniMerger`] is the shipped
//! implementation; anything implementing [`IniMerger`] can replace it.

use crate::error::Result;

/// How incoming INI content combines with existing content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IniMergeOptions {
    /// Replace values of keys present on both sides.
    pub overwrite_values: bool,
    /// Append incoming comments to matched sections/entries.
    pub overwrite_comments: bool,
}

impl IniMergeOptions {
    /// Only insert missing sections and keys.
    pub const ADD: Self = IniMergeOptions {
        overwrite_values: false,
        overwrite_comments: false,
    };
    /// Insert missing keys and replace existing values.
    pub const OVERWRITE_VALUES: Self = IniMergeOptions {
        overwrite_values: true,
        overwrite_comments: false,
    };
    pub const OVERWRITE: Self = IniMergeOptions {
        overwrite_values: true,
        overwrite_comments: true,
    };
}

/// Merges two INI documents given as text.
pub trait IniMerger: Send + Sync {
    /// Merge `incoming` into `existing`, preserving unrelated existing
    /// content and comments except where `options` direct otherwise.
    fn merge(&self, existing: &str, incoming: &str, options: IniMergeOptions) -> Result<String>;
}

/// Line-preserving INI merger.
pub struct StructuredIniMerger;

impl IniMerger for StructuredIniMerger {
    fn merge(&self, existing: &str, incoming: &str, options: IniMergeOptions) -> Result<String> {
        let mut current = IniDocument::parse(existing);
        let other = IniDocument::parse(incoming);
        current.merge(other, options);
        Ok(current.render())
    }
}

#[derive(Debug, Default)]
struct IniDocument {
    sections: Vec<IniSection>,
    eof_comment: Vec<String>,
}

#[derive(Debug, Default)]
struct IniSection {
    comment: Vec<String>,
    /// Raw header line, `None` for the implicit leading section.
    header: Option<String>,
    name: Option<String>,
    entries: Vec<IniEntry>,
}

#[derive(Debug)]
struct IniEntry {
    comment: Vec<String>,
    /// Raw `key=value` line, reproduced verbatim.
    line: String,
    /// Normalized key for matching.
    key: String,
}

impl IniDocument {
    fn parse(text: &str) -> IniDocument {
        let mut doc = IniDocument::default();
        let mut comment: Vec<String> = Vec::new();
        let mut section = IniSection::default();

        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with(';') || trimmed.starts_with('#') {
                comment.push(line.to_owned());
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix('[') {
                match rest.find(']') {
                    Some(end) => {
                        if section.header.is_some() || !section.entries.is_empty() {
                            doc.sections.push(section);
                        }
                        section = IniSection {
                            comment: std::mem::take(&mut comment),
                            header: Some(line.to_owned()),
                            name: Some(rest[..end].trim().to_owned()),
                            entries: Vec::new(),
                        };
                        continue;
                    }
                    // an unclosed header is not an entry, whatever it contains
                    None => {
                        comment.push(line.to_owned());
                        continue;
                    }
                }
            }
            if !trimmed.is_empty() {
                if let Some(separator) = line.find('=') {
                    section.entries.push(IniEntry {
                        comment: std::mem::take(&mut comment),
                        line: line.to_owned(),
                        key: normalize(&line[..separator]),
                    });
                    continue;
                }
            }
            // empty or unparseable lines ride along as comments
            comment.push(line.to_owned());
        }

        if section.header.is_some() || !section.entries.is_empty() {
            doc.sections.push(section);
        }
        doc.eof_comment = comment;
        doc
    }

    fn merge(&mut self, other: IniDocument, options: IniMergeOptions) {
        for other_section in other.sections {
            let needle = other_section.name.as_deref().map(normalize);
            match self
                .sections
                .iter_mut()
                .find(|s| s.name.as_deref().map(normalize) == needle)
            {
                None => self.sections.push(other_section),
                Some(current) => current.merge(other_section, options),
            }
        }
        if options.overwrite_comments {
            self.eof_comment.extend(other.eof_comment);
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut push = |line: &str| {
            out.push_str(line);
            out.push('\n');
        };
        for section in &self.sections {
            section.comment.iter().for_each(|l| push(l));
            if let Some(header) = &section.header {
                push(header);
            }
            for entry in &section.entries {
                entry.comment.iter().for_each(|l| push(l));
                push(&entry.line);
            }
        }
        self.eof_comment.iter().for_each(|l| push(l));
        out
    }
}

impl IniSection {
    fn merge(&mut self, other: IniSection, options: IniMergeOptions) {
        for other_entry in other.entries {
            match self.entries.iter_mut().find(|e| e.key == other_entry.key) {
                None => self.entries.push(other_entry),
                Some(current) => {
                    if options.overwrite_values {
                        current.line = other_entry.line;
                    }
                    if options.overwrite_comments {
                        current.comment.extend(other_entry.comment);
                    }
                }
            }
        }
        if options.overwrite_comments {
            self.comment.extend(other.comment);
        }
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}
