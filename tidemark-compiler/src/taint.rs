//! Taint analysis over expression ASTs.
//!
//! For every dynamic fragment the engine must know, at compile time, which
//! assign paths the fragment reads, so the emitted conditional can skip
//! recomputation when none of them changed. The analysis is conservative by
//! design: any construct it cannot see through widens the result to "always
//! recompute". It never fails.
//!
//! Three variable modes drive the traversal. `Untainted` is the starting
//! state; reading a free variable there taints the whole fragment (template
//! locals defeat tracking, which is reported as a warning upstream).
//! `Restricted` holds under scope-introducing constructs (`if`, `match`,
//! `for`, `while`, `loop`, closures, blocks): variables read there are
//! assumed to be bound by the construct itself and never taint the
//! enclosing expression, regardless of taint already acquired outside.
//! `Tainted` is absorbing for the fragment as a whole; forced taint (macro
//! invocations mutate scope unknowably) also escapes restricted scopes.

use std::collections::{BTreeSet, HashSet};

use serde_json::{Map, Value};

use crate::expr::{assign_ref, AssignRef};
use tidemark::changed::{path_changed, AssignPath, Assigns};

/// Variable-taint mode, as described in the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vars {
    Untainted,
    Restricted,
    Tainted,
}

/// What one expression depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaintSummary {
    /// Static assign paths read by the expression.
    pub assigns: BTreeSet<AssignPath>,
    /// The bare `assigns` handle was referenced: strong taint.
    pub strong: bool,
    /// A free variable was read in tracking position.
    pub var_taint: bool,
    /// An unrecognized or scope-mutating construct forced the widening.
    pub forced: bool,
    /// Names behind `var_taint`, first occurrence first, for warnings.
    pub tainted_vars: Vec<String>,
}

impl TaintSummary {
    /// Fold a nested fragment's summary into this one across a scope
    /// boundary: assign reads and forced taint propagate, variable taint
    /// does not (the nested fragment recomputes on its own terms).
    pub fn merge_scoped(&mut self, inner: &TaintSummary) {
        self.assigns.extend(inner.assigns.iter().cloned());
        self.strong |= inner.strong;
        self.forced |= inner.forced;
    }

    /// Fold a sibling fragment's summary, keeping everything.
    pub fn merge(&mut self, inner: &TaintSummary) {
        self.merge_scoped(inner);
        self.var_taint |= inner.var_taint;
        for name in &inner.tainted_vars {
            if !self.tainted_vars.contains(name) {
                self.tainted_vars.push(name.clone());
            }
        }
    }

    /// Derive the recompute keys, pruning any path whose strict parent is
    /// also tracked (checking the parent covers the child).
    pub fn keys(&self) -> Keys {
        if self.strong || self.forced || self.var_taint {
            return Keys::All;
        }
        let pruned = self
            .assigns
            .iter()
            .filter(|path| {
                !self
                    .assigns
                    .iter()
                    .any(|other| other.is_strict_parent_of(path))
            })
            .cloned()
            .collect();
        Keys::Paths(pruned)
    }
}

/// The per-dynamic recompute condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Keys {
    /// Unconditional: recompute on every render.
    All,
    /// Recompute when any tracked path is marked changed. An empty set
    /// means the fragment only computes on the initial render.
    Paths(BTreeSet<AssignPath>),
}

impl Keys {
    pub fn union(self, other: Keys) -> Keys {
        match (self, other) {
            (Keys::All, _) | (_, Keys::All) => Keys::All,
            (Keys::Paths(mut a), Keys::Paths(b)) => {
                a.extend(b);
                Keys::Paths(a)
            }
        }
    }

    /// Evaluate the condition against a present changed map.
    pub fn changed(&self, assigns: &Assigns, changed: &Map<String, Value>) -> bool {
        match self {
            Keys::All => true,
            Keys::Paths(paths) => paths.iter().any(|path| path_changed(assigns, changed, path)),
        }
    }
}

/// Analyze one expression, starting untainted.
pub fn analyze(expr: &syn::Expr) -> TaintSummary {
    let mut analyzer = Analyzer::new();
    analyzer.walk(expr);
    analyzer.finish()
}

struct Analyzer {
    /// Nesting depth of scope-introducing constructs. Tracked apart from
    /// the taint flag: a bound variable must stay shielded even after an
    /// earlier free variable already tainted the fragment.
    restricted: usize,
    tainted: bool,
    seen: HashSet<String>,
    summary: TaintSummary,
}

impl Analyzer {
    fn new() -> Self {
        Self {
            restricted: 0,
            tainted: false,
            seen: HashSet::new(),
            summary: TaintSummary::default(),
        }
    }

    /// The mode at the current lexical position.
    fn mode(&self) -> Vars {
        if self.restricted > 0 {
            Vars::Restricted
        } else if self.tainted {
            Vars::Tainted
        } else {
            Vars::Untainted
        }
    }

    fn finish(mut self) -> TaintSummary {
        if self.tainted {
            self.summary.var_taint = true;
        }
        self.summary
    }

    fn record(&mut self, reference: AssignRef) {
        match reference {
            AssignRef::Whole => self.summary.strong = true,
            AssignRef::Path(path) => {
                self.summary.assigns.insert(path);
            }
        }
    }

    fn read_var(&mut self, name: &str) {
        if self.seen.contains(name) {
            return;
        }
        if self.mode() == Vars::Restricted {
            // lexically bound by an enclosing construct
            return;
        }
        self.tainted = true;
        self.seen.insert(name.to_string());
        self.summary.tainted_vars.push(name.to_string());
    }

    fn force(&mut self) {
        self.summary.forced = true;
    }

    /// Run `f` one restriction level deeper; taint acquired inside
    /// survives, the restriction itself does not.
    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        self.restricted += 1;
        f(self);
        self.restricted -= 1;
    }

    fn walk(&mut self, expr: &syn::Expr) {
        if let Some(reference) = assign_ref(expr) {
            self.record(reference);
            return;
        }

        use syn::Expr::*;
        match expr {
            Array(e) => e.elems.iter().for_each(|e| self.walk(e)),
            Assign(e) => {
                self.walk(&e.left);
                self.walk(&e.right);
            }
            Async(e) => self.scoped(|a| a.walk_block(&e.block)),
            Await(e) => self.walk(&e.base),
            Binary(e) => {
                self.walk(&e.left);
                self.walk(&e.right);
            }
            Block(e) => self.scoped(|a| a.walk_block(&e.block)),
            Break(e) => {
                if let Some(inner) = &e.expr {
                    self.walk(inner);
                }
            }
            Call(e) => {
                // the callee names a function, not a value
                if !matches!(&*e.func, syn::Expr::Path(_)) {
                    self.walk(&e.func);
                }
                e.args.iter().for_each(|arg| self.walk(arg));
            }
            Cast(e) => self.walk(&e.expr),
            Closure(e) => self.scoped(|a| a.walk(&e.body)),
            Continue(_) => {}
            Field(e) => self.walk(&e.base),
            ForLoop(e) => {
                self.walk(&e.expr);
                self.scoped(|a| a.walk_block(&e.body));
            }
            Group(e) => self.walk(&e.expr),
            If(e) => {
                self.walk(&e.cond);
                self.scoped(|a| a.walk_block(&e.then_branch));
                if let Some((_, else_branch)) = &e.else_branch {
                    self.scoped(|a| a.walk(else_branch));
                }
            }
            Index(e) => {
                if let Some(reference) = assign_ref(&e.expr) {
                    // dynamic accessor below a static prefix: track the
                    // prefix, analyze the accessor itself
                    self.record(reference);
                } else {
                    self.walk(&e.expr);
                }
                self.walk(&e.index);
            }
            Infer(_) => {}
            Let(e) => self.walk(&e.expr),
            Lit(_) => {}
            Loop(e) => self.scoped(|a| a.walk_block(&e.body)),
            Macro(_) => self.force(),
            Match(e) => {
                self.walk(&e.expr);
                for arm in &e.arms {
                    self.scoped(|a| {
                        if let Some((_, guard)) = &arm.guard {
                            a.walk(guard);
                        }
                        a.walk(&arm.body);
                    });
                }
            }
            MethodCall(e) => {
                // the method name is an operator position, never a value
                self.walk(&e.receiver);
                e.args.iter().for_each(|arg| self.walk(arg));
            }
            Paren(e) => self.walk(&e.expr),
            Path(e) => self.walk_path(e),
            Range(e) => {
                if let Some(start) = &e.start {
                    self.walk(start);
                }
                if let Some(end) = &e.end {
                    self.walk(end);
                }
            }
            Reference(e) => self.walk(&e.expr),
            Repeat(e) => {
                self.walk(&e.expr);
                self.walk(&e.len);
            }
            Return(e) => {
                if let Some(inner) = &e.expr {
                    self.walk(inner);
                }
            }
            Struct(e) => {
                for field in &e.fields {
                    self.walk(&field.expr);
                }
                if let Some(rest) = &e.rest {
                    self.walk(rest);
                }
            }
            Try(e) => self.walk(&e.expr),
            TryBlock(e) => self.scoped(|a| a.walk_block(&e.block)),
            Tuple(e) => e.elems.iter().for_each(|e| self.walk(e)),
            Unary(e) => self.walk(&e.expr),
            Unsafe(e) => self.scoped(|a| a.walk_block(&e.block)),
            While(e) => {
                self.walk(&e.cond);
                self.scoped(|a| a.walk_block(&e.body));
            }
            Yield(e) => {
                if let Some(inner) = &e.expr {
                    self.walk(inner);
                }
            }
            // anything the analysis does not recognize widens to :all
            _ => self.force(),
        }
    }

    fn walk_block(&mut self, block: &syn::Block) {
        for stmt in &block.stmts {
            match stmt {
                syn::Stmt::Local(local) => {
                    if let Some(init) = &local.init {
                        self.walk(&init.expr);
                        if let Some((_, diverge)) = &init.diverge {
                            self.walk(diverge);
                        }
                    }
                }
                syn::Stmt::Expr(expr, _) => self.walk(expr),
                syn::Stmt::Macro(_) | syn::Stmt::Item(_) => self.force(),
            }
        }
    }

    fn walk_path(&mut self, path: &syn::ExprPath) {
        if path.qself.is_some() || path.path.segments.len() != 1 {
            // qualified and multi-segment paths name items, not values
            return;
        }
        let ident = path.path.segments[0].ident.to_string();
        if ident
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
        {
            // unit struct or enum variant, not a variable
            return;
        }
        self.read_var(&ident);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemark::changed::PathSeg;

    fn analyze_code(code: &str) -> TaintSummary {
        let rewritten = crate::expr::rewrite_assign_sugar(code);
        let expr = syn::parse_str::<syn::Expr>(&rewritten).unwrap();
        analyze(&expr)
    }

    fn paths(summary: &TaintSummary) -> Vec<String> {
        summary.assigns.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn simple_assign_read() {
        let summary = analyze_code("@name");
        assert_eq!(paths(&summary), ["@name"]);
        assert!(!summary.strong);
        assert_eq!(summary.keys(), Keys::Paths([AssignPath::root("name")].into()));
    }

    #[test]
    fn nested_paths_are_tracked() {
        let summary = analyze_code("@user.profile.name");
        assert_eq!(paths(&summary), ["@user.profile.name"]);

        let summary = analyze_code(r#"@user.settings["theme"]"#);
        let path = summary.assigns.iter().next().unwrap();
        assert_eq!(path.segs[1], PathSeg::Access("theme".into()));
    }

    #[test]
    fn dynamic_accessor_truncates_to_prefix() {
        let summary = analyze_code("@user.settings[key]");
        assert_eq!(paths(&summary), ["@user.settings"]);
        // the accessor itself is a free variable read
        assert!(summary.var_taint || summary.tainted_vars.contains(&"key".to_string()));
    }

    #[test]
    fn bare_assigns_is_strong_taint() {
        let summary = analyze_code("assigns");
        assert!(summary.strong);
        assert_eq!(summary.keys(), Keys::All);

        let summary = analyze_code("render_all(assigns)");
        assert!(summary.strong);
    }

    #[test]
    fn free_variable_taints_and_is_reported() {
        let summary = analyze_code("name");
        assert!(summary.var_taint);
        assert_eq!(summary.tainted_vars, ["name"]);
        assert_eq!(summary.keys(), Keys::All);
    }

    #[test]
    fn closure_parameters_do_not_taint() {
        let summary = analyze_code("@items.len() + (|x| x + 1)(2)");
        assert!(!summary.var_taint, "{:?}", summary.tainted_vars);
        assert_eq!(paths(&summary), ["@items"]);
    }

    #[test]
    fn bound_variables_after_a_taint_stay_shielded() {
        // `name` taints the fragment; `y` is a closure parameter and must
        // not be reported even though the fragment is already tainted
        let summary = analyze_code("name + (|y| y)(1)");
        assert!(summary.var_taint);
        assert_eq!(summary.tainted_vars, ["name"]);

        let summary = analyze_code("count + @rows.len() + (|row| row)(0)");
        assert_eq!(summary.tainted_vars, ["count"]);
    }

    #[test]
    fn variables_inside_scoped_constructs_do_not_taint() {
        let summary = analyze_code("if @ok { y } else { z }");
        assert!(!summary.var_taint);
        assert_eq!(paths(&summary), ["@ok"]);

        let summary = analyze_code("match @status { s => s }");
        assert!(!summary.var_taint);
        assert_eq!(paths(&summary), ["@status"]);
    }

    #[test]
    fn assign_reads_inside_scopes_still_count() {
        let summary = analyze_code("if @flag { @a } else { @b }");
        assert_eq!(paths(&summary), ["@a", "@b", "@flag"]);
        assert!(matches!(summary.keys(), Keys::Paths(p) if p.len() == 3));
    }

    #[test]
    fn macro_forces_taint_even_inside_scope() {
        let summary = analyze_code("format!(\"{}\", 1)");
        assert!(summary.forced);
        assert_eq!(summary.keys(), Keys::All);

        let summary = analyze_code("if @ok { format!(\"x\") } else { \"y\" }");
        assert!(summary.forced, "forced taint must escape restricted scopes");
    }

    #[test]
    fn constructors_and_item_paths_are_not_variables() {
        let summary = analyze_code("Some(@x)");
        assert!(!summary.var_taint);
        assert_eq!(paths(&summary), ["@x"]);

        let summary = analyze_code("std::cmp::max(@a, @b)");
        assert!(!summary.var_taint);
    }

    #[test]
    fn method_names_are_skipped() {
        let summary = analyze_code("@list.len()");
        assert!(!summary.var_taint);
        assert_eq!(paths(&summary), ["@list"]);
    }

    #[test]
    fn parent_pruning() {
        let summary = analyze_code("(@user, @user.profile.name)");
        let Keys::Paths(keys) = summary.keys() else {
            panic!();
        };
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.iter().next().unwrap(), &AssignPath::root("user"));
    }

    #[test]
    fn empty_keys_for_pure_literals() {
        let summary = analyze_code("1 + 2");
        assert_eq!(summary.keys(), Keys::Paths(BTreeSet::new()));
    }

    #[test]
    fn keys_changed_consults_the_changed_map() {
        let summary = analyze_code("@name");
        let keys = summary.keys();
        let assigns = match json!({"name": "Ana"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let changed = |v: Value| match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(keys.changed(&assigns, &changed(json!({"name": true}))));
        assert!(!keys.changed(&assigns, &changed(json!({}))));
        assert!(!keys.changed(&assigns, &changed(json!({"other": true}))));
        assert!(Keys::All.changed(&assigns, &changed(json!({}))));
    }
}
