//! Compatibility rule book.
//!
//! A [`RuleBook`] is the table the conflict detector consults: for an
//! unordered pair of [`ChangeType`]s it answers whether the changes can be
//! combined deterministically, and with which [`MergeStrategy`]. The default
//! table is built once at startup; hosts may extend it at runtime with
//! [`RuleBook::add_rule`]. Unknown pairs are conservatively incompatible
//! with strategy `ai_required`.

use std::collections::BTreeMap;

use crate::model::change::ChangeType;
use crate::model::conflict::ConflictRegion;
use crate::model::merge::MergeStrategy;

// ---------------------------------------------------------------------------
// CompatibilityRule
// ---------------------------------------------------------------------------

/// A rule defining compatibility between two change types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompatibilityRule {
    /// First change type.
    pub change_type_a: ChangeType,
    /// Second change type (may equal the first).
    pub change_type_b: ChangeType,
    /// Whether these changes can be auto-merged.
    pub compatible: bool,
    /// The strategy to use when compatible (or the routing marker when not).
    pub strategy: Option<MergeStrategy>,
    /// Human-readable explanation.
    pub reason: &'static str,
    /// Whether the rule applies to both `(a, b)` and `(b, a)`.
    pub bidirectional: bool,
}

impl CompatibilityRule {
    const fn new(
        a: ChangeType,
        b: ChangeType,
        compatible: bool,
        strategy: MergeStrategy,
        reason: &'static str,
    ) -> Self {
        Self {
            change_type_a: a,
            change_type_b: b,
            compatible,
            strategy: Some(strategy),
            reason,
            bidirectional: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RuleBook
// ---------------------------------------------------------------------------

/// Indexed compatibility rules.
#[derive(Clone, Debug)]
pub struct RuleBook {
    rules: Vec<CompatibilityRule>,
    index: BTreeMap<(ChangeType, ChangeType), usize>,
}

impl Default for RuleBook {
    fn default() -> Self {
        let mut book = Self {
            rules: Vec::new(),
            index: BTreeMap::new(),
        };
        for rule in default_rules() {
            book.add_rule(rule);
        }
        book
    }
}

impl RuleBook {
    /// Add a rule, indexing `(a, b)` and — when bidirectional — `(b, a)`.
    ///
    /// A later rule for the same pair shadows an earlier one.
    pub fn add_rule(&mut self, rule: CompatibilityRule) {
        let idx = self.rules.len();
        self.index
            .insert((rule.change_type_a, rule.change_type_b), idx);
        if rule.bidirectional && rule.change_type_a != rule.change_type_b {
            self.index
                .insert((rule.change_type_b, rule.change_type_a), idx);
        }
        self.rules.push(rule);
    }

    /// Look up the rule for a pair, if one exists.
    #[must_use]
    pub fn lookup(&self, a: ChangeType, b: ChangeType) -> Option<&CompatibilityRule> {
        self.index.get(&(a, b)).map(|idx| &self.rules[*idx])
    }

    /// Resolve a pair to `(compatible, strategy, reason)`.
    ///
    /// Pairs without a rule are incompatible with strategy `ai_required`.
    #[must_use]
    pub fn analyze_pair(
        &self,
        a: ChangeType,
        b: ChangeType,
    ) -> (bool, Option<MergeStrategy>, String) {
        self.lookup(a, b).map_or_else(
            || {
                (
                    false,
                    Some(MergeStrategy::AiRequired),
                    format!("No rule for {a} + {b}"),
                )
            },
            |rule| (rule.compatible, rule.strategy, rule.reason.to_owned()),
        )
    }

    /// All compatible pairs and their strategies.
    #[must_use]
    pub fn compatible_pairs(&self) -> Vec<(ChangeType, ChangeType, MergeStrategy)> {
        self.rules
            .iter()
            .filter(|r| r.compatible)
            .filter_map(|r| {
                r.strategy
                    .map(|s| (r.change_type_a, r.change_type_b, s))
            })
            .collect()
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the book holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Render a multi-line, human-readable explanation of a conflict.
    #[must_use]
    pub fn explain(&self, conflict: &ConflictRegion) -> String {
        let mut lines = vec![
            format!("Conflict in {} at {}", conflict.file_path, conflict.location),
            format!("Severity: {}", conflict.severity),
        ];
        for (task, change_type) in conflict
            .tasks_involved
            .iter()
            .zip(conflict.change_types.iter())
        {
            lines.push(format!("  {task}: {change_type}"));
        }
        if !conflict.reason.is_empty() {
            lines.push(format!("Reason: {}", conflict.reason));
        }
        if conflict.can_auto_merge {
            let strategy = conflict
                .merge_strategy
                .map_or_else(|| "unspecified".to_owned(), |s| s.to_string());
            lines.push(format!("Action: auto-merge via {strategy}"));
        } else if conflict.merge_strategy == Some(MergeStrategy::HumanRequired) {
            lines.push("Action: human review required".to_owned());
        } else {
            lines.push("Action: AI resolution required".to_owned());
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Default table
// ---------------------------------------------------------------------------

fn default_rules() -> Vec<CompatibilityRule> {
    use ChangeType as C;
    use MergeStrategy as S;

    vec![
        // Imports
        CompatibilityRule::new(
            C::AddImport,
            C::AddImport,
            true,
            S::CombineImports,
            "Adding different imports is always compatible",
        ),
        CompatibilityRule::new(
            C::AddImport,
            C::RemoveImport,
            false,
            S::AiRequired,
            "Import add/remove may conflict if same module",
        ),
        // Functions
        CompatibilityRule::new(
            C::AddFunction,
            C::AddFunction,
            true,
            S::AppendFunctions,
            "Adding different functions is compatible",
        ),
        CompatibilityRule::new(
            C::AddFunction,
            C::ModifyFunction,
            true,
            S::AppendFunctions,
            "Adding a function doesn't affect modifications to other functions",
        ),
        CompatibilityRule::new(
            C::ModifyFunction,
            C::ModifyFunction,
            false,
            S::AiRequired,
            "Multiple modifications to same function need analysis",
        ),
        // React hooks
        CompatibilityRule::new(
            C::AddHookCall,
            C::AddHookCall,
            true,
            S::OrderByDependency,
            "Multiple hooks can be added with correct ordering",
        ),
        CompatibilityRule::new(
            C::AddHookCall,
            C::WrapJsx,
            true,
            S::HooksThenWrap,
            "Hooks are added at function start, wrap is on return",
        ),
        CompatibilityRule::new(
            C::AddHookCall,
            C::ModifyFunction,
            true,
            S::HooksFirst,
            "Hooks go at start, other modifications likely elsewhere",
        ),
        // JSX
        CompatibilityRule::new(
            C::WrapJsx,
            C::WrapJsx,
            true,
            S::OrderByDependency,
            "Multiple wraps can be nested in correct order",
        ),
        CompatibilityRule::new(
            C::WrapJsx,
            C::AddJsxElement,
            true,
            S::AppendStatements,
            "Wrapping and adding elements are independent",
        ),
        CompatibilityRule::new(
            C::ModifyJsxProps,
            C::ModifyJsxProps,
            true,
            S::CombineProps,
            "Props can usually be combined if different",
        ),
        // Classes & methods
        CompatibilityRule::new(
            C::AddMethod,
            C::AddMethod,
            true,
            S::AppendMethods,
            "Adding different methods is compatible",
        ),
        CompatibilityRule::new(
            C::ModifyMethod,
            C::ModifyMethod,
            false,
            S::AiRequired,
            "Multiple modifications to same method need analysis",
        ),
        CompatibilityRule::new(
            C::AddClass,
            C::ModifyClass,
            true,
            S::AppendFunctions,
            "New classes don't conflict with modifications",
        ),
        // Variables & constants
        CompatibilityRule::new(
            C::AddVariable,
            C::AddVariable,
            true,
            S::AppendStatements,
            "Adding different variables is compatible",
        ),
        CompatibilityRule::new(
            C::AddConstant,
            C::AddVariable,
            true,
            S::AppendStatements,
            "Constants and variables are independent",
        ),
        // TypeScript types
        CompatibilityRule::new(
            C::AddType,
            C::AddType,
            true,
            S::AppendFunctions,
            "Adding different types is compatible",
        ),
        CompatibilityRule::new(
            C::AddInterface,
            C::AddInterface,
            true,
            S::AppendFunctions,
            "Adding different interfaces is compatible",
        ),
        CompatibilityRule::new(
            C::ModifyInterface,
            C::ModifyInterface,
            false,
            S::AiRequired,
            "Multiple interface modifications need analysis",
        ),
        // Decorators
        CompatibilityRule::new(
            C::AddDecorator,
            C::AddDecorator,
            true,
            S::OrderByDependency,
            "Decorators can be stacked with correct order",
        ),
        // Comments & formatting
        CompatibilityRule::new(
            C::AddComment,
            C::AddComment,
            true,
            S::AppendStatements,
            "Comments are independent",
        ),
        CompatibilityRule::new(
            C::FormattingOnly,
            C::FormattingOnly,
            true,
            S::OrderByTime,
            "Formatting doesn't affect semantics",
        ),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::conflict::ConflictSeverity;

    #[test]
    fn default_table_is_nonempty() {
        let book = RuleBook::default();
        assert_eq!(book.len(), 22);
        assert!(!book.is_empty());
    }

    #[test]
    fn representative_pairs() {
        let book = RuleBook::default();
        let cases = [
            (
                ChangeType::AddImport,
                ChangeType::AddImport,
                true,
                MergeStrategy::CombineImports,
            ),
            (
                ChangeType::AddImport,
                ChangeType::RemoveImport,
                false,
                MergeStrategy::AiRequired,
            ),
            (
                ChangeType::AddFunction,
                ChangeType::ModifyFunction,
                true,
                MergeStrategy::AppendFunctions,
            ),
            (
                ChangeType::ModifyFunction,
                ChangeType::ModifyFunction,
                false,
                MergeStrategy::AiRequired,
            ),
            (
                ChangeType::AddHookCall,
                ChangeType::WrapJsx,
                true,
                MergeStrategy::HooksThenWrap,
            ),
            (
                ChangeType::AddHookCall,
                ChangeType::ModifyFunction,
                true,
                MergeStrategy::HooksFirst,
            ),
            (
                ChangeType::WrapJsx,
                ChangeType::WrapJsx,
                true,
                MergeStrategy::OrderByDependency,
            ),
            (
                ChangeType::WrapJsx,
                ChangeType::AddJsxElement,
                true,
                MergeStrategy::AppendStatements,
            ),
            (
                ChangeType::ModifyJsxProps,
                ChangeType::ModifyJsxProps,
                true,
                MergeStrategy::CombineProps,
            ),
            (
                ChangeType::AddMethod,
                ChangeType::AddMethod,
                true,
                MergeStrategy::AppendMethods,
            ),
            (
                ChangeType::ModifyMethod,
                ChangeType::ModifyMethod,
                false,
                MergeStrategy::AiRequired,
            ),
            (
                ChangeType::AddClass,
                ChangeType::ModifyClass,
                true,
                MergeStrategy::AppendFunctions,
            ),
            (
                ChangeType::AddVariable,
                ChangeType::AddVariable,
                true,
                MergeStrategy::AppendStatements,
            ),
            (
                ChangeType::AddConstant,
                ChangeType::AddVariable,
                true,
                MergeStrategy::AppendStatements,
            ),
            (
                ChangeType::AddType,
                ChangeType::AddType,
                true,
                MergeStrategy::AppendFunctions,
            ),
            (
                ChangeType::AddInterface,
                ChangeType::AddInterface,
                true,
                MergeStrategy::AppendFunctions,
            ),
            (
                ChangeType::ModifyInterface,
                ChangeType::ModifyInterface,
                false,
                MergeStrategy::AiRequired,
            ),
            (
                ChangeType::AddDecorator,
                ChangeType::AddDecorator,
                true,
                MergeStrategy::OrderByDependency,
            ),
            (
                ChangeType::AddComment,
                ChangeType::AddComment,
                true,
                MergeStrategy::AppendStatements,
            ),
            (
                ChangeType::FormattingOnly,
                ChangeType::FormattingOnly,
                true,
                MergeStrategy::OrderByTime,
            ),
        ];
        for (a, b, compatible, strategy) in cases {
            let (got_compat, got_strategy, _) = book.analyze_pair(a, b);
            assert_eq!(got_compat, compatible, "compat for {a} + {b}");
            assert_eq!(got_strategy, Some(strategy), "strategy for {a} + {b}");
        }
    }

    #[test]
    fn bidirectional_lookup() {
        let book = RuleBook::default();
        // Registered as (AddHookCall, ModifyFunction); reversed order must
        // resolve to the same rule.
        let forward = book
            .lookup(ChangeType::AddHookCall, ChangeType::ModifyFunction)
            .expect("forward");
        let reverse = book
            .lookup(ChangeType::ModifyFunction, ChangeType::AddHookCall)
            .expect("reverse");
        assert_eq!(forward, reverse);
        assert_eq!(forward.strategy, Some(MergeStrategy::HooksFirst));
    }

    #[test]
    fn unknown_pair_defaults_to_ai() {
        let book = RuleBook::default();
        let (compatible, strategy, reason) =
            book.analyze_pair(ChangeType::WrapJsx, ChangeType::RemoveFunction);
        assert!(!compatible);
        assert_eq!(strategy, Some(MergeStrategy::AiRequired));
        assert!(reason.contains("No rule"));
    }

    #[test]
    fn add_rule_shadows_existing() {
        let mut book = RuleBook::default();
        book.add_rule(CompatibilityRule {
            change_type_a: ChangeType::ModifyFunction,
            change_type_b: ChangeType::ModifyFunction,
            compatible: true,
            strategy: Some(MergeStrategy::OrderByTime),
            reason: "trusting sequential edits",
            bidirectional: true,
        });
        let (compatible, strategy, _) =
            book.analyze_pair(ChangeType::ModifyFunction, ChangeType::ModifyFunction);
        assert!(compatible);
        assert_eq!(strategy, Some(MergeStrategy::OrderByTime));
    }

    #[test]
    fn add_unidirectional_rule() {
        let mut book = RuleBook::default();
        book.add_rule(CompatibilityRule {
            change_type_a: ChangeType::RemoveDecorator,
            change_type_b: ChangeType::AddDecorator,
            compatible: true,
            strategy: Some(MergeStrategy::OrderByTime),
            reason: "one-way",
            bidirectional: false,
        });
        assert!(
            book.lookup(ChangeType::RemoveDecorator, ChangeType::AddDecorator)
                .is_some()
        );
        assert!(
            book.lookup(ChangeType::AddDecorator, ChangeType::RemoveDecorator)
                .is_none()
        );
    }

    #[test]
    fn compatible_pairs_listing() {
        let book = RuleBook::default();
        let pairs = book.compatible_pairs();
        assert!(pairs.contains(&(
            ChangeType::AddImport,
            ChangeType::AddImport,
            MergeStrategy::CombineImports
        )));
        assert!(
            pairs
                .iter()
                .all(|(_, _, s)| *s != MergeStrategy::AiRequired)
        );
    }

    #[test]
    fn explain_renders_all_sections() {
        let book = RuleBook::default();
        let conflict = ConflictRegion {
            file_path: "src/App.tsx".to_owned(),
            location: "function:App".to_owned(),
            tasks_involved: vec!["task-001".to_owned(), "task-002".to_owned()],
            change_types: vec![ChangeType::ModifyFunction, ChangeType::ModifyFunction],
            severity: ConflictSeverity::Medium,
            can_auto_merge: false,
            merge_strategy: Some(MergeStrategy::AiRequired),
            reason: "Multiple modifications to same function need analysis".to_owned(),
        };
        let text = book.explain(&conflict);
        assert!(text.contains("src/App.tsx"));
        assert!(text.contains("function:App"));
        assert!(text.contains("task-001: modify_function"));
        assert!(text.contains("Severity: medium"));
        assert!(text.contains("AI resolution required"));
    }
}
