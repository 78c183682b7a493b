//! INI-style router configuration.
//!
//! Sections that are never modified are re-emitted exactly as read, so
//! operator comments and formatting in unrelated sections survive a rewrite.

use iprotate_config::ApiSection;
use iprotate_core::RouterSection;

pub const API_SECTION: &str = "api";
pub const ENDPOINT_TYPE: &str = "aws";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    /// Header and body exactly as read; empty for sections created in memory.
    raw: String,
    entries: Vec<(String, String)>,
    dirty: bool,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            raw: String::new(),
            entries: Vec::new(),
            dirty: true,
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => {
                if v != value {
                    *v = value.to_string();
                    self.dirty = true;
                }
            }
            None => {
                self.entries.push((key.to_string(), value.to_string()));
                self.dirty = true;
            }
        }
    }

    fn render_into(&self, out: &mut String) {
        if !self.dirty {
            out.push_str(&self.raw);
            return;
        }
        out.push('[');
        out.push_str(&self.name);
        out.push_str("]\n");
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterDocument {
    /// Text before the first section header.
    preamble: String,
    sections: Vec<Section>,
}

impl RouterDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = Self::default();
        for line in text.split_inclusive('\n') {
            if let Some(name) = header_name(line) {
                doc.sections.push(Section {
                    name: name.to_string(),
                    raw: line.to_string(),
                    entries: Vec::new(),
                    dirty: false,
                });
                continue;
            }
            match doc.sections.last_mut() {
                Some(section) => {
                    section.raw.push_str(line);
                    if let Some((key, value)) = entry(line) {
                        match section.entries.iter_mut().find(|(k, _)| k == key) {
                            Some((_, v)) => *v = value.to_string(),
                            None => section.entries.push((key.to_string(), value.to_string())),
                        }
                    }
                }
                None => doc.preamble.push_str(line),
            }
        }
        doc
    }

    pub fn render(&self) -> String {
        let mut out = self.preamble.clone();
        for section in &self.sections {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            section.render_into(&mut out);
        }
        out
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Ports of all sections whose name is a port number.
    pub fn numeric_ports(&self) -> Vec<u16> {
        self.sections
            .iter()
            .filter_map(|s| parse_port(&s.name))
            .collect()
    }

    /// First free port: one past the highest numeric section, or `floor`.
    pub fn next_port(&self, floor: u16) -> Option<u16> {
        match self.numeric_ports().into_iter().max() {
            Some(max) => max.checked_add(1),
            None => Some(floor),
        }
    }

    /// Numeric sections whose `accessKey` equals `access_key`, with their
    /// current `instanceId` (if any).
    pub fn endpoints_for_access_key(&self, access_key: &str) -> Vec<(u16, Option<String>)> {
        self.sections
            .iter()
            .filter_map(|s| {
                let port = parse_port(&s.name)?;
                let matches = s
                    .entries
                    .iter()
                    .any(|(k, v)| k == "accessKey" && v == access_key);
                if !matches {
                    return None;
                }
                let instance = s
                    .entries
                    .iter()
                    .find(|(k, _)| k == "instanceId")
                    .map(|(_, v)| v.clone());
                Some((port, instance))
            })
            .collect()
    }

    /// Write the endpoint fields of `section`, keeping any other keys.
    ///
    /// Returns `true` when the section did not exist and was created.
    pub fn upsert_endpoint(&mut self, section: &RouterSection) -> bool {
        let name = section.port.to_string();
        let created = !self.has_section(&name);
        let target = self.section_mut_or_insert(&name);
        for (key, value) in endpoint_entries(section) {
            target.set(key, &value);
        }
        created
    }

    /// Insert the reserved listener section if it is missing.
    ///
    /// Returns `true` when it was inserted.
    pub fn ensure_api(&mut self, api: &ApiSection) -> bool {
        if self.has_section(API_SECTION) {
            return false;
        }
        let mut section = Section::new(API_SECTION);
        for (key, value) in api.entries() {
            section.set(key, value);
        }
        self.sections.insert(0, section);
        true
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut_or_insert(&mut self, name: &str) -> &mut Section {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }
}

fn endpoint_entries(section: &RouterSection) -> [(&'static str, String); 7] {
    [
        ("type", ENDPOINT_TYPE.to_string()),
        ("socks5Port", section.socks5_port.to_string()),
        ("httpPort", section.http_port.to_string()),
        ("accessKey", section.access_key.clone()),
        ("secretKey", section.secret_key.clone()),
        ("instanceId", section.instance_id.clone()),
        ("region", section.region.clone()),
    ]
}

fn header_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('[')?.strip_suffix(']')?;
    Some(inner.trim())
}

fn entry(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
        return None;
    }
    let split = trimmed.find(['=', ':'])?;
    let key = trimmed[..split].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, trimmed[split + 1..].trim()))
}

fn parse_port(name: &str) -> Option<u16> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
