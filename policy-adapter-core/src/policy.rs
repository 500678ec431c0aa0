//! Policy model contract consumed from the authorization engine

use std::collections::BTreeMap;

use crate::{CasbinRule, CoreError};

/// In-memory policy model the adapter loads into and saves from
pub trait Model: Send + Sync {
    /// Add `rule` under type `ptype` of section `sec`.
    ///
    /// Returns `false` if the rule was already present.
    fn add_policy(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool;

    /// Every rule group currently held, by section and type
    fn policy_groups(&self) -> Vec<PolicyGroup<'_>>;
}

/// Rules of one type within one section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyGroup<'a> {
    pub sec: &'a str,
    pub ptype: &'a str,
    pub rules: &'a [Vec<String>],
}

/// Parse a policy text line (`ptype, f0, f1, ...`) into `model`.
///
/// Blank lines and `#` comments are skipped. The section is the first
/// character of the type label.
pub fn load_policy_line(line: &str, model: &mut dyn Model) -> Result<(), CoreError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(());
    }

    let mut tokens = line.split(',').map(|token| token.trim().to_string());
    let ptype = match tokens.next() {
        Some(ptype) if !ptype.is_empty() => ptype,
        _ => return Err(CoreError::InvalidPolicyLine(line.to_string())),
    };
    let rule: Vec<String> = tokens.collect();

    model.add_policy(section(&ptype), &ptype, rule);
    Ok(())
}

/// Add a stored rule to `model` field by field, without going through text.
///
/// Returns `Ok(false)` when the rule has no non-empty value and was skipped.
pub fn load_policy_rule(rule: &CasbinRule, model: &mut dyn Model) -> Result<bool, CoreError> {
    if rule.ptype.is_empty() {
        return Err(CoreError::MissingPolicyType);
    }
    let fields = rule.policy_fields();
    if fields.is_empty() {
        return Ok(false);
    }

    model.add_policy(section(&rule.ptype), &rule.ptype, fields);
    Ok(true)
}

/// Section of a type label: its first character (`p2` is in `p`)
fn section(ptype: &str) -> &str {
    &ptype[..ptype.chars().next().map_or(0, char::len_utf8)]
}

/// Plain in-memory model: section -> type -> rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryModel {
    sections: BTreeMap<String, BTreeMap<String, Vec<Vec<String>>>>,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model from policy text, one rule per line
    pub fn from_lines<'a, I>(lines: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut model = Self::new();
        for line in lines {
            load_policy_line(line, &mut model)?;
        }
        Ok(model)
    }

    /// Rules of `ptype` in section `sec`, in insertion order
    pub fn get_policy(&self, sec: &str, ptype: &str) -> &[Vec<String>] {
        self.sections
            .get(sec)
            .and_then(|types| types.get(ptype))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> bool {
        self.get_policy(sec, ptype).iter().any(|r| r == rule)
    }

    /// Total number of rules across all sections
    pub fn len(&self) -> usize {
        self.sections
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Model for MemoryModel {
    fn add_policy(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool {
        let rules = self
            .sections
            .entry(sec.to_string())
            .or_default()
            .entry(ptype.to_string())
            .or_default();
        if rules.contains(&rule) {
            return false;
        }
        rules.push(rule);
        true
    }

    fn policy_groups(&self) -> Vec<PolicyGroup<'_>> {
        self.sections
            .iter()
            .flat_map(|(sec, types)| {
                types.iter().map(move |(ptype, rules)| PolicyGroup {
                    sec: sec.as_str(),
                    ptype: ptype.as_str(),
                    rules: rules.as_slice(),
                })
            })
            .collect()
    }
}
