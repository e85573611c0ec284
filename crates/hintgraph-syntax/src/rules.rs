//! Canonicalization rule sets.
//!
//! A [`RuleSet`] is a named, versioned table of rewrites plus the language
//! facts the rewrites depend on (builtin names kept by anonymization,
//! commutative operators). Changing what a rule does means bumping the
//! version: graphs record the rule set they were built with, and states
//! canonicalized under different tables are never compared.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleSetId {
    pub name: String,
    pub version: u32,
}

impl RuleSetId {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for RuleSetId {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .split_once('@')
            .ok_or_else(|| RuleError::BadId(s.to_string()))?;
        let version = version
            .parse::<u32>()
            .map_err(|_| RuleError::BadId(s.to_string()))?;
        if name.is_empty() {
            return Err(RuleError::BadId(s.to_string()));
        }
        Ok(Self::new(name, version))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("invalid rule set id `{0}` (expected `name@version`)")]
    BadId(String),
    #[error("no rule set registered for language `{0}`")]
    UnknownLanguage(String),
}

/// Individual rewrites. Each rule is enabled or not per rule set; enabled
/// rules are tried in the order they are listed in the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// `(paren x)` becomes `x`.
    CollapseParens,
    /// `a > b` becomes `b < a`, `a >= b` becomes `b <= a`.
    FlipComparison,
    /// `not not x` becomes `x`.
    DoubleNegation,
    /// `x op= e` becomes `x = x op e`.
    ExpandAugAssign,
    /// Integer `c1 op c2` for `+ - *` (and unary minus) becomes a constant.
    FoldConstants,
    /// `if not c: A else: B` becomes `if c: B else: A`.
    NegatedIf,
    /// An `else` branch that is empty or only `pass` is dropped.
    DropEmptyElse,
    /// `pass` next to other statements is dropped.
    DropRedundantPass,
    /// Operands of commutative operators are put in canonical order.
    SortCommutative,
}

impl Rule {
    pub const ALL: [Rule; 9] = [
        Rule::CollapseParens,
        Rule::FlipComparison,
        Rule::DoubleNegation,
        Rule::ExpandAugAssign,
        Rule::FoldConstants,
        Rule::NegatedIf,
        Rule::DropEmptyElse,
        Rule::DropRedundantPass,
        Rule::SortCommutative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Rule::CollapseParens => "collapse_parens",
            Rule::FlipComparison => "flip_comparison",
            Rule::DoubleNegation => "double_negation",
            Rule::ExpandAugAssign => "expand_aug_assign",
            Rule::FoldConstants => "fold_constants",
            Rule::NegatedIf => "negated_if",
            Rule::DropEmptyElse => "drop_empty_else",
            Rule::DropRedundantPass => "drop_redundant_pass",
            Rule::SortCommutative => "sort_commutative",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: RuleSetId,
    pub rules: Vec<Rule>,
    /// Identifiers that anonymization leaves untouched.
    pub builtins: BTreeSet<String>,
    /// `bin_op`/`compare` operators whose operands may be reordered.
    pub commutative_ops: BTreeSet<String>,
}

const PYTHON_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "filter", "float", "input", "int", "len",
    "list", "map", "max", "min", "open", "print", "range", "reversed", "round", "set", "sorted",
    "str", "sum", "tuple", "zip", "True", "False", "None",
];

const COMMUTATIVE_OPS: &[&str] = &["+", "*", "==", "!=", "&", "|", "^"];

impl RuleSet {
    /// Rules for Python-like task languages.
    pub fn python_v1() -> Self {
        Self {
            id: RuleSetId::new("python", 1),
            rules: Rule::ALL.to_vec(),
            builtins: PYTHON_BUILTINS.iter().map(|s| s.to_string()).collect(),
            commutative_ops: COMMUTATIVE_OPS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Language-agnostic subset: no builtins, no constant folding.
    pub fn generic_v1() -> Self {
        Self {
            id: RuleSetId::new("generic", 1),
            rules: vec![
                Rule::CollapseParens,
                Rule::FlipComparison,
                Rule::DoubleNegation,
                Rule::DropRedundantPass,
                Rule::SortCommutative,
            ],
            builtins: BTreeSet::new(),
            commutative_ops: COMMUTATIVE_OPS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Look up one of the rule sets shipped with the crate.
    pub fn builtin(id: &RuleSetId) -> Option<Self> {
        [Self::python_v1(), Self::generic_v1()]
            .into_iter()
            .find(|set| &set.id == id)
    }

    pub fn enables(&self, rule: Rule) -> bool {
        self.rules.contains(&rule)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    pub fn is_commutative(&self, op: &str) -> bool {
        self.commutative_ops.contains(op)
    }

    /// Copy of this set with one rule disabled (the id is kept; callers that
    /// persist graphs should give the variant its own id).
    pub fn without(mut self, rule: Rule) -> Self {
        self.rules.retain(|r| *r != rule);
        self
    }

    pub fn with_id(mut self, id: RuleSetId) -> Self {
        self.id = id;
        self
    }
}

/// Language identifier → rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    sets: AHashMap<String, Arc<RuleSet>>,
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `python` and `generic`.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        reg.register("python", RuleSet::python_v1());
        reg.register("generic", RuleSet::generic_v1());
        reg
    }

    pub fn register(&mut self, language: impl Into<String>, set: RuleSet) -> Option<Arc<RuleSet>> {
        self.sets.insert(language.into(), Arc::new(set))
    }

    pub fn get(&self, language: &str) -> Option<Arc<RuleSet>> {
        self.sets.get(language).cloned()
    }

    pub fn resolve(&self, language: &str) -> Result<Arc<RuleSet>, RuleError> {
        self.get(language)
            .ok_or_else(|| RuleError::UnknownLanguage(language.to_string()))
    }

    /// Find a registered set by id (used when reopening persisted graphs).
    pub fn by_id(&self, id: &RuleSetId) -> Option<Arc<RuleSet>> {
        self.sets.values().find(|set| &set.id == id).cloned()
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        langs.sort_unstable();
        langs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display() {
        let id: RuleSetId = "python@1".parse().unwrap();
        assert_eq!(id, RuleSet::python_v1().id);
        assert_eq!(id.to_string(), "python@1");
        assert!("python".parse::<RuleSetId>().is_err());
        assert!("@3".parse::<RuleSetId>().is_err());
    }

    #[test]
    fn registry_resolves_by_language_and_id() {
        let reg = RuleRegistry::builtin();
        assert_eq!(reg.languages(), vec!["generic", "python"]);
        assert!(reg.resolve("python").unwrap().is_builtin("print"));
        assert!(!reg.resolve("generic").unwrap().is_builtin("print"));
        assert!(matches!(
            reg.resolve("cobol"),
            Err(RuleError::UnknownLanguage(l)) if l == "cobol"
        ));
        assert!(reg.by_id(&RuleSetId::new("generic", 1)).is_some());
        assert!(reg.by_id(&RuleSetId::new("generic", 2)).is_none());
    }

    #[test]
    fn without_disables_a_rule() {
        let set = RuleSet::python_v1().without(Rule::SortCommutative);
        assert!(!set.enables(Rule::SortCommutative));
        assert!(set.enables(Rule::CollapseParens));
    }
}
