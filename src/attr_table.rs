//! Attribute-string tokenizer.
//!
//! Content tables describe each choice with a string such as
//! `Section=combat Note="+%V HP" Features="1:Armor Proficiency (Light)",Darkvision`.
//! [`AttrTable::parse`] splits it into ordered `key -> [values]` pairs.

use crate::error::RuleError;
use std::fmt;

/// Ordered key/value-list pairs parsed from an attribute string.
///
/// # Examples
///
/// ```rust
/// use rulegraph::attr_table::AttrTable;
///
/// let table = AttrTable::parse(r#"Type=General Require="strength >= 13" Features=a,"b, c""#).unwrap();
/// assert_eq!(table.get("Type"), Some("General"));
/// assert_eq!(table.get("Require"), Some("strength >= 13"));
/// assert_eq!(table.get_list("Features"), &["a".to_string(), "b, c".to_string()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrTable {
    entries: Vec<(String, Vec<String>)>,
}

impl AttrTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse strictly: the first malformed token is an error.
    pub fn parse(text: &str) -> Result<AttrTable, RuleError> {
        let (table, errors) = AttrTable::parse_lossy(text);
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(table),
        }
    }

    /// Parse best-effort: malformed tokens are returned alongside every pair
    /// that did parse.
    pub fn parse_lossy(text: &str) -> (AttrTable, Vec<RuleError>) {
        let mut table = AttrTable::new();
        let mut errors = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let mut pos = 0;
        while pos < chars.len() {
            if chars[pos].is_whitespace() {
                pos += 1;
                continue;
            }
            let start = pos;
            while pos < chars.len() && chars[pos] != '=' && !chars[pos].is_whitespace() {
                pos += 1;
            }
            let key: String = chars[start..pos].iter().collect();
            if pos >= chars.len() || chars[pos] != '=' {
                errors.push(RuleError::attributes(text, format!("`{}` has no value", key)));
                continue;
            }
            pos += 1;
            match read_values(&chars, &mut pos) {
                Ok(values) => table.append(&key, values),
                Err(reason) => {
                    errors.push(RuleError::attributes(text, format!("{}: {}", key, reason)));
                    // Unterminated quote consumes the rest of the input.
                    break;
                }
            }
        }
        (table, errors)
    }

    /// The first value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_list(key).first().map(String::as_str)
    }

    pub fn get_list(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Replace the values of `key`, keeping its position.
    pub fn set(&mut self, key: &str, values: Vec<String>) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = values,
            None => self.entries.push((key.to_string(), values)),
        }
    }

    /// Add values to the end of `key`'s list. A repeated key in the source
    /// string appends.
    pub fn append(&mut self, key: &str, values: Vec<String>) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => v.extend(values),
            None => self.entries.push((key.to_string(), values)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_values(chars: &[char], pos: &mut usize) -> Result<Vec<String>, String> {
    let mut values = Vec::new();
    loop {
        let mut item = String::new();
        if *pos < chars.len() && chars[*pos] == '"' {
            *pos += 1;
            let mut closed = false;
            while *pos < chars.len() {
                match chars[*pos] {
                    '\\' if *pos + 1 < chars.len() && chars[*pos + 1] == '"' => {
                        item.push('"');
                        *pos += 2;
                    }
                    '"' => {
                        *pos += 1;
                        closed = true;
                        break;
                    }
                    c => {
                        item.push(c);
                        *pos += 1;
                    }
                }
            }
            if !closed {
                return Err("unterminated quote".to_string());
            }
        } else {
            while *pos < chars.len() && chars[*pos] != ',' && !chars[*pos].is_whitespace() {
                item.push(chars[*pos]);
                *pos += 1;
            }
        }
        values.push(item);
        if *pos < chars.len() && chars[*pos] == ',' {
            *pos += 1;
            continue;
        }
        return Ok(values);
    }
}

fn needs_quotes(item: &str) -> bool {
    item.is_empty() || item.contains(|c: char| c.is_whitespace() || c == ',' || c == '"')
}

impl fmt::Display for AttrTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, values)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}=", key)?;
            for (j, item) in values.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                if needs_quotes(item) {
                    write!(f, "\"{}\"", item.replace('"', "\\\""))?;
                } else {
                    f.write_str(item)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_pairs() {
        let t = AttrTable::parse("Section=combat Note=\"+%V HP\"").unwrap();
        assert_eq!(t.get("Section"), Some("combat"));
        assert_eq!(t.get("Note"), Some("+%V HP"));
        assert_eq!(t.keys().collect::<Vec<_>>(), vec!["Section", "Note"]);
    }

    #[test]
    fn test_lists_and_quotes() {
        let t = AttrTable::parse(
            r#"Features="1:Skill Proficiency (Choose 2 from Arcana, History)","1:Darkvision" Languages=Common,Elvish"#,
        )
        .unwrap();
        assert_eq!(t.get_list("Features").len(), 2);
        assert_eq!(t.get_list("Features")[0], "1:Skill Proficiency (Choose 2 from Arcana, History)");
        assert_eq!(t.get_list("Languages"), &["Common".to_string(), "Elvish".to_string()]);
    }

    #[test]
    fn test_semicolons_and_escapes_kept() {
        let t = AttrTable::parse(r#"Note="Tool Proficiency (Choose 1 from Lute;Lyre)" Quote="say \"hi\"""#).unwrap();
        assert_eq!(t.get("Note"), Some("Tool Proficiency (Choose 1 from Lute;Lyre)"));
        assert_eq!(t.get("Quote"), Some("say \"hi\""));
    }

    #[test]
    fn test_number() {
        let t = AttrTable::parse("HitDie=d8 Level=3").unwrap();
        assert_eq!(t.get_number("Level"), Some(3.0));
        assert_eq!(t.get_number("HitDie"), None);
        assert_eq!(t.get_number("Missing"), None);
    }

    #[test]
    fn test_best_effort() {
        let (t, errors) = AttrTable::parse_lossy("Type=General Stray Section=combat");
        assert_eq!(errors.len(), 1);
        assert_eq!(t.get("Type"), Some("General"));
        assert_eq!(t.get("Section"), Some("combat"));
        assert!(AttrTable::parse("Note=\"open").is_err());
    }

    #[test]
    fn test_edit_and_display() {
        let mut t = AttrTable::parse("Features=a,b Type=General").unwrap();
        t.append("Features", vec!["c d".to_string()]);
        t.set("Type", vec!["Fighter".to_string()]);
        assert_eq!(t.to_string(), "Features=a,b,\"c d\" Type=Fighter");
        assert_eq!(t.remove("Type"), Some(vec!["Fighter".to_string()]));
        assert!(!t.contains_key("Type"));
        let reparsed = AttrTable::parse(&t.to_string()).unwrap();
        assert_eq!(reparsed, t);
    }
}
