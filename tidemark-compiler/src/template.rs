//! The compiled template artifact and its execution.
//!
//! A [`Template`] is the compiler's output: the static string list, one
//! slot of IR per dynamic position, and a structural fingerprint. Executing
//! it against an assigns map yields a [`Rendered`]. Each slot carries the
//! [`Keys`] its taint analysis produced; at render time the slot consults
//! the changed map and yields [`Dyn::Nil`] when nothing it depends on
//! changed.
//!
//! Nested structures render conservatively: whenever a control-flow slot
//! recomputes, the selected arm renders in full (its own slots do not emit
//! `Nil`). Distinct arms carry distinct fingerprints, so the differ treats
//! an arm switch as a full replacement; a nested `Nil` would be
//! indistinguishable from a stale value there.

use serde_json::{Map, Value};

use crate::eex::BlockKind;
use crate::errors::RenderError;
use crate::eval::{self, to_text, truthy, Scope};
use crate::source::Pos;
use crate::taint::Keys;
use indexmap::IndexMap;
use tidemark::changed::{change_mark, changed_map, AssignPath, Assigns};
use tidemark::{escape_html, Caller, Component, Comprehension, Dyn, Iodata, Rendered, StreamAnnot, StreamInsert};

/// A parsed expression with its source text and template position.
#[derive(Debug, Clone)]
pub(crate) struct CompiledExpr {
    pub expr: syn::Expr,
    pub code: String,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledPat {
    pub pat: syn::Pat,
    pub code: String,
    pub pos: Pos,
}

/// The compiled template: `N + 1` statics around `N` dynamic slots.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) statics: Vec<String>,
    pub(crate) dynamics: Vec<DynamicSlot>,
    /// Silent expressions, run for their bindings before the dynamic at the
    /// paired index (an index one past the end runs after every dynamic).
    pub(crate) silents: Vec<(usize, CompiledExpr)>,
    pub(crate) fingerprint: u128,
    pub(crate) root: Option<bool>,
    pub(crate) caller: Caller,
    pub(crate) file: String,
}

#[derive(Debug, Clone)]
pub(crate) enum DynamicSlot {
    /// Escaped expression output in element content.
    Expr { expr: CompiledExpr, keys: Keys },
    /// One dynamic attribute: ` name="value"` or nothing.
    Attr {
        name: String,
        expr: CompiledExpr,
        keys: Keys,
    },
    /// Root spread: the expression yields an attribute bag.
    Spread { expr: CompiledExpr, keys: Keys },
    Block(Box<BlockSlot>),
    Loop(Box<LoopSlot>),
    Component(Box<ComponentSlot>),
}

impl DynamicSlot {
    pub(crate) fn keys(&self) -> &Keys {
        match self {
            DynamicSlot::Expr { keys, .. }
            | DynamicSlot::Attr { keys, .. }
            | DynamicSlot::Spread { keys, .. } => keys,
            DynamicSlot::Block(block) => &block.keys,
            DynamicSlot::Loop(l) => &l.keys,
            DynamicSlot::Component(component) => &component.keys,
        }
    }
}

/// `if` / `unless` / `case` / `cond`, and the `:if` directive wrapper.
#[derive(Debug, Clone)]
pub(crate) struct BlockSlot {
    pub kind: BlockKind,
    /// Scrutinee or condition; `None` for `cond`.
    pub head: Option<CompiledExpr>,
    pub arms: Vec<BlockArm>,
    pub keys: Keys,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub(crate) struct BlockArm {
    /// `case` arm pattern.
    pub pattern: Option<CompiledPat>,
    /// `cond` arm condition.
    pub condition: Option<CompiledExpr>,
    pub body: Template,
}

/// A `for` comprehension (block form or `:for` directive).
#[derive(Debug, Clone)]
pub(crate) struct LoopSlot {
    pub pat: CompiledPat,
    pub enumerable: CompiledExpr,
    /// `:if` combined with `:for` filters per iteration.
    pub filter: Option<CompiledExpr>,
    /// `:key` expression; evaluated per row, consumed by the differ.
    pub key: Option<CompiledExpr>,
    pub body: Template,
    pub keys: Keys,
}

/// A component invocation.
#[derive(Debug, Clone)]
pub(crate) struct ComponentSlot {
    pub component_ref: String,
    pub stateful: bool,
    /// Attributes and spreads in source order; later entries overwrite.
    pub entries: Vec<ComponentEntry>,
    /// Named slots grouped in first-seen order.
    pub slots: IndexMap<String, Vec<SlotInstance>>,
    /// The implicit slot built from the component's direct children.
    pub inner_block: Option<SlotInstance>,
    pub keys: Keys,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub(crate) enum ComponentEntry {
    Attr(ComponentAttr),
    Spread { expr: CompiledExpr, keys: Keys },
}

#[derive(Debug, Clone)]
pub(crate) struct ComponentAttr {
    pub name: String,
    pub value: ComponentValue,
    pub keys: Keys,
    /// Set when the value is exactly an assign path, enabling partial
    /// changed marks.
    pub path: Option<AssignPath>,
}

#[derive(Debug, Clone)]
pub(crate) enum ComponentValue {
    Literal(Value),
    Expr(CompiledExpr),
}

/// One slot entry on a component.
#[derive(Debug, Clone)]
pub(crate) struct SlotInstance {
    pub name: String,
    pub entries: Vec<ComponentEntry>,
    pub filter_if: Option<CompiledExpr>,
    pub repeat_for: Option<(CompiledPat, CompiledExpr)>,
    pub let_pat: Option<CompiledPat>,
    pub body: Option<Template>,
    pub handle: u64,
}

impl Template {
    /// Render with change tracking: the `__changed__` key of the assigns is
    /// consulted and unchanged slots come back as [`Dyn::Nil`].
    pub fn render(&self, assigns: &Assigns) -> Result<Rendered, RenderError> {
        self.render_tracked(assigns, true)
    }

    /// Render with explicit control over tracking. With `track_changes`
    /// false the changed map is ignored and every slot is computed.
    pub fn render_tracked(
        &self,
        assigns: &Assigns,
        track_changes: bool,
    ) -> Result<Rendered, RenderError> {
        let changed = if track_changes {
            changed_map(assigns)
        } else {
            None
        };
        let mut scope = Scope::new(assigns);
        self.render_in_scope(&mut scope, changed)
    }

    pub fn fingerprint(&self) -> u128 {
        self.fingerprint
    }

    pub fn root(&self) -> Option<bool> {
        self.root
    }

    pub fn statics(&self) -> &[String] {
        &self.statics
    }

    fn render_in_scope(
        &self,
        scope: &mut Scope<'_>,
        changed: Option<&Map<String, Value>>,
    ) -> Result<Rendered, RenderError> {
        let dynamics = self.render_dynamics(scope, changed)?;
        Ok(Rendered {
            statics: self.statics.clone(),
            dynamics,
            fingerprint: self.fingerprint,
            root: self.root,
            caller: self.caller.clone(),
        })
    }

    /// One row of dynamics. The statics come from the template itself.
    fn render_dynamics(
        &self,
        scope: &mut Scope<'_>,
        changed: Option<&Map<String, Value>>,
    ) -> Result<Vec<Dyn>, RenderError> {
        let mut out = Vec::with_capacity(self.dynamics.len());
        let mut silents = self.silents.iter().peekable();
        for (index, slot) in self.dynamics.iter().enumerate() {
            while let Some((_, expr)) = silents.next_if(|(at, _)| *at <= index) {
                self.eval_in(expr, scope)?;
            }
            out.push(self.render_slot(slot, scope, changed)?);
        }
        for (_, expr) in silents {
            self.eval_in(expr, scope)?;
        }
        Ok(out)
    }

    fn render_slot(
        &self,
        slot: &DynamicSlot,
        scope: &mut Scope<'_>,
        changed: Option<&Map<String, Value>>,
    ) -> Result<Dyn, RenderError> {
        let assigns = scope.assigns();
        let compute = match changed {
            None => true,
            Some(map) => slot.keys().changed(assigns, map),
        };
        if !compute {
            return Ok(Dyn::Nil);
        }

        match slot {
            DynamicSlot::Expr { expr, .. } => {
                let value = self.eval_in(expr, scope)?;
                let text = self.text_in(expr, &value)?;
                Ok(Dyn::Iodata(Iodata::from(
                    escape_html(&text).into_owned(),
                )))
            }
            DynamicSlot::Attr { name, expr, .. } => {
                let value = self.eval_in(expr, scope)?;
                let fragment = crate::attrs::attr_fragment(name, &value)
                    .map_err(|source| self.eval_error(expr, source))?;
                Ok(Dyn::Iodata(Iodata::from(fragment)))
            }
            DynamicSlot::Spread { expr, .. } => {
                let value = self.eval_in(expr, scope)?;
                let Value::Object(map) = &value else {
                    return Err(RenderError::BadAttributeSpread {
                        file: self.file.clone(),
                        pos: expr.pos,
                        value: value.to_string(),
                    });
                };
                let fragment = crate::attrs::spread_fragment(map)
                    .map_err(|source| self.eval_error(expr, source))?;
                Ok(Dyn::Iodata(Iodata::from(fragment)))
            }
            DynamicSlot::Block(block) => self.render_block(block, scope),
            DynamicSlot::Loop(l) => self.render_loop(l, scope),
            DynamicSlot::Component(component) => {
                self.render_component(component, scope, changed)
            }
        }
    }

    /// Select and fully render one arm. Arms were compiled with their own
    /// fingerprints; the differ handles the switch.
    fn render_block(
        &self,
        block: &BlockSlot,
        scope: &mut Scope<'_>,
    ) -> Result<Dyn, RenderError> {
        match block.kind {
            BlockKind::If | BlockKind::Unless => {
                let head = block.head.as_ref().expect("conditional without head");
                let mut selected = truthy(&self.eval_in(head, scope)?);
                if block.kind == BlockKind::Unless {
                    selected = !selected;
                }
                let arm = if selected { &block.arms[0] } else { &block.arms[1] };
                let rendered = arm.body.render_in_scope(scope, None)?;
                Ok(Dyn::Rendered(Box::new(rendered)))
            }
            BlockKind::Case => {
                let head = block.head.as_ref().expect("case without head");
                let value = self.eval_in(head, scope)?;
                for arm in &block.arms {
                    let pattern = arm.pattern.as_ref().expect("case arm without pattern");
                    let mut bindings = Vec::new();
                    let matched = eval::match_pattern(&pattern.pat, &value, &mut bindings)
                        .map_err(|source| RenderError::Eval {
                            file: self.file.clone(),
                            pos: pattern.pos,
                            expr: pattern.code.clone(),
                            source,
                        })?;
                    if matched {
                        scope.push_frame();
                        for (name, bound) in bindings {
                            scope.bind(name, bound);
                        }
                        let rendered = arm.body.render_in_scope(scope, None);
                        scope.pop_frame();
                        return Ok(Dyn::Rendered(Box::new(rendered?)));
                    }
                }
                Err(RenderError::NoClauseMatched {
                    file: self.file.clone(),
                    pos: block.pos,
                    head: head.code.clone(),
                    value: value.to_string(),
                })
            }
            BlockKind::Cond => {
                for arm in &block.arms {
                    let condition = arm.condition.as_ref().expect("cond arm without condition");
                    if truthy(&self.eval_in(condition, scope)?) {
                        let rendered = arm.body.render_in_scope(scope, None)?;
                        return Ok(Dyn::Rendered(Box::new(rendered)));
                    }
                }
                Err(RenderError::NoClauseMatched {
                    file: self.file.clone(),
                    pos: block.pos,
                    head: "cond".to_string(),
                    value: "no truthy condition".to_string(),
                })
            }
            BlockKind::For => unreachable!("for blocks compile to Loop slots"),
        }
    }

    /// Comprehensions share the body statics across rows and never track
    /// changes per iteration: when the comprehension computes, every row
    /// computes.
    fn render_loop(&self, l: &LoopSlot, scope: &mut Scope<'_>) -> Result<Dyn, RenderError> {
        let value = self.eval_in(&l.enumerable, scope)?;
        let (items, stream) = self.enumerate(&l.enumerable, value)?;

        let mut rows = Vec::with_capacity(items.len());
        for item in &items {
            scope.push_frame();
            let row = self.render_loop_row(l, item, scope);
            scope.pop_frame();
            match row? {
                Some(row) => rows.push(row),
                None => continue,
            }
        }
        Ok(Dyn::Comprehension(Box::new(Comprehension {
            statics: l.body.statics.clone(),
            dynamics: rows,
            fingerprint: l.body.fingerprint,
            stream,
        })))
    }

    fn render_loop_row(
        &self,
        l: &LoopSlot,
        item: &Value,
        scope: &mut Scope<'_>,
    ) -> Result<Option<Vec<Dyn>>, RenderError> {
        let mut bindings = Vec::new();
        let matched = eval::match_pattern(&l.pat.pat, item, &mut bindings).map_err(|source| {
            RenderError::Eval {
                file: self.file.clone(),
                pos: l.pat.pos,
                expr: l.pat.code.clone(),
                source,
            }
        })?;
        if !matched {
            return Err(RenderError::GeneratorMismatch {
                file: self.file.clone(),
                pos: l.pat.pos,
                pattern: l.pat.code.clone(),
                value: item.to_string(),
            });
        }
        for (name, bound) in bindings {
            scope.bind(name, bound);
        }
        if let Some(filter) = &l.filter {
            if !truthy(&self.eval_in(filter, scope)?) {
                return Ok(None);
            }
        }
        if let Some(key) = &l.key {
            // the key must compute; the differ consumes it from the wire
            self.eval_in(key, scope)?;
        }
        Ok(Some(l.body.render_dynamics(scope, None)?))
    }

    /// An enumerable is a list, or a stream bag marked `__stream__` whose
    /// inserts carry the items and whose bookkeeping is surfaced to the
    /// differ.
    fn enumerate(
        &self,
        source_expr: &CompiledExpr,
        value: Value,
    ) -> Result<(Vec<Value>, Option<StreamAnnot>), RenderError> {
        match value {
            Value::Array(items) => Ok((items, None)),
            Value::Object(map) if map.contains_key("__stream__") => {
                let bag = map
                    .get("__stream__")
                    .and_then(Value::as_object)
                    .ok_or_else(|| RenderError::BadEnumerable {
                        file: self.file.clone(),
                        pos: source_expr.pos,
                        value: "a malformed stream".into(),
                    })?;
                let stream_ref = bag
                    .get("ref")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut items = Vec::new();
                let mut inserts = Vec::new();
                for insert in bag.get("inserts").and_then(Value::as_array).into_iter().flatten() {
                    let Some(fields) = insert.as_array() else {
                        continue;
                    };
                    let id = fields
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let at = fields.get(1).and_then(Value::as_i64).unwrap_or(-1);
                    let item = fields.get(2).cloned().unwrap_or(Value::Null);
                    let limit = fields.get(3).and_then(Value::as_i64);
                    items.push(item);
                    inserts.push(StreamInsert { id, at, limit });
                }
                let deletes = bag
                    .get("deletes")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let reset = bag.get("reset").and_then(Value::as_bool);
                Ok((
                    items,
                    Some(StreamAnnot {
                        stream_ref,
                        inserts,
                        deletes,
                        reset,
                    }),
                ))
            }
            other => Err(RenderError::BadEnumerable {
                file: self.file.clone(),
                pos: source_expr.pos,
                value: other.to_string(),
            }),
        }
    }

    /// Build the `Component` placeholder: assigns from attributes, spreads
    /// and slots, plus the per-key changed sub-map for stateless children.
    fn render_component(
        &self,
        component: &ComponentSlot,
        scope: &mut Scope<'_>,
        changed: Option<&Map<String, Value>>,
    ) -> Result<Dyn, RenderError> {
        let mut cassigns = Map::new();
        let mut static_keys = Vec::new();
        for entry in &component.entries {
            match entry {
                ComponentEntry::Attr(attr) => {
                    let value = match &attr.value {
                        ComponentValue::Literal(value) => value.clone(),
                        ComponentValue::Expr(expr) => self.eval_in(expr, scope)?,
                    };
                    static_keys.push(attr.name.clone());
                    cassigns.insert(attr.name.clone(), value);
                }
                ComponentEntry::Spread { expr, .. } => {
                    match self.eval_in(expr, scope)? {
                        Value::Object(map) => {
                            for (key, spread_value) in map {
                                cassigns.insert(key, spread_value);
                            }
                        }
                        other => {
                            return Err(RenderError::BadAttributeSpread {
                                file: self.file.clone(),
                                pos: expr.pos,
                                value: other.to_string(),
                            });
                        }
                    }
                }
            }
        }

        for (name, instances) in &component.slots {
            let mut group = Vec::new();
            for instance in instances {
                self.render_slot_instances(instance, scope, &mut group)?;
            }
            cassigns.insert(name.clone(), Value::Array(group));
        }
        if let Some(inner) = &component.inner_block {
            let mut group = Vec::new();
            self.render_slot_instances(inner, scope, &mut group)?;
            cassigns.insert(crate::tree::INNER_BLOCK.to_string(), Value::Array(group));
        }

        let component_changed = if component.stateful {
            // a stateful component's engine computes its own tracking
            None
        } else {
            changed.map(|map| self.component_changed(component, &static_keys, scope.assigns(), map))
        };

        let id = cassigns
            .get("id")
            .map(|value| to_text(value).unwrap_or_default())
            .unwrap_or_default();

        Ok(Dyn::Component(Box::new(Component {
            id,
            component_ref: component.component_ref.clone(),
            assigns: cassigns,
            changed: component_changed,
        })))
    }

    fn render_slot_instances(
        &self,
        instance: &SlotInstance,
        scope: &mut Scope<'_>,
        group: &mut Vec<Value>,
    ) -> Result<(), RenderError> {
        if let Some((pat, enumerable)) = &instance.repeat_for {
            let value = self.eval_in(enumerable, scope)?;
            let (items, _) = self.enumerate(enumerable, value)?;
            for item in &items {
                scope.push_frame();
                let result = (|| {
                    let mut bindings = Vec::new();
                    if !eval::match_pattern(&pat.pat, item, &mut bindings).map_err(|source| {
                        RenderError::Eval {
                            file: self.file.clone(),
                            pos: pat.pos,
                            expr: pat.code.clone(),
                            source,
                        }
                    })? {
                        return Err(RenderError::GeneratorMismatch {
                            file: self.file.clone(),
                            pos: pat.pos,
                            pattern: pat.code.clone(),
                            value: item.to_string(),
                        });
                    }
                    for (name, bound) in bindings {
                        scope.bind(name, bound);
                    }
                    self.slot_instance_value(instance, scope, group)
                })();
                scope.pop_frame();
                result?;
            }
            return Ok(());
        }
        self.slot_instance_value(instance, scope, group)
    }

    fn slot_instance_value(
        &self,
        instance: &SlotInstance,
        scope: &mut Scope<'_>,
        group: &mut Vec<Value>,
    ) -> Result<(), RenderError> {
        if let Some(filter) = &instance.filter_if {
            if !truthy(&self.eval_in(filter, scope)?) {
                return Ok(());
            }
        }
        let mut slot_assigns = Map::new();
        slot_assigns.insert(
            "__slot__".to_string(),
            Value::String(instance.name.clone()),
        );
        for entry in &instance.entries {
            match entry {
                ComponentEntry::Attr(attr) => {
                    let value = match &attr.value {
                        ComponentValue::Literal(value) => value.clone(),
                        ComponentValue::Expr(expr) => self.eval_in(expr, scope)?,
                    };
                    slot_assigns.insert(attr.name.clone(), value);
                }
                ComponentEntry::Spread { expr, .. } => {
                    match self.eval_in(expr, scope)? {
                        Value::Object(map) => {
                            for (key, spread_value) in map {
                                slot_assigns.insert(key, spread_value);
                            }
                        }
                        other => {
                            return Err(RenderError::BadAttributeSpread {
                                file: self.file.clone(),
                                pos: expr.pos,
                                value: other.to_string(),
                            });
                        }
                    }
                }
            }
        }
        if instance.body.is_some() {
            let mut inner = Map::new();
            inner.insert(
                "__inner_block__".to_string(),
                Value::String(format!("{:016x}", instance.handle)),
            );
            slot_assigns.insert("inner_block".to_string(), Value::Object(inner));
        }
        group.push(Value::Object(slot_assigns));
        Ok(())
    }

    /// Per-key changed marks: `true`, a forwarded partial map, or omitted.
    /// A changed spread overwrites arbitrarily, so it marks every
    /// statically known key.
    fn component_changed(
        &self,
        component: &ComponentSlot,
        static_keys: &[String],
        assigns: &Assigns,
        changed: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        let spread_changed = component.entries.iter().any(|entry| {
            matches!(entry, ComponentEntry::Spread { keys, .. } if keys.changed(assigns, changed))
        });
        if spread_changed {
            for key in static_keys {
                out.insert(key.clone(), Value::Bool(true));
            }
        } else {
            for entry in &component.entries {
                let ComponentEntry::Attr(attr) = entry else {
                    continue;
                };
                match &attr.path {
                    Some(path) => {
                        if let Some(mark) = change_mark(assigns, changed, path) {
                            out.insert(attr.name.clone(), mark);
                        }
                    }
                    None => {
                        if attr.keys.changed(assigns, changed) {
                            out.insert(attr.name.clone(), Value::Bool(true));
                        }
                    }
                }
            }
        }

        for (name, instances) in &component.slots {
            let slot_changed = instances
                .iter()
                .any(|instance| instance_keys_changed(instance, assigns, changed));
            if slot_changed {
                out.insert(name.clone(), Value::Bool(true));
            }
        }
        if let Some(inner) = &component.inner_block {
            if instance_keys_changed(inner, assigns, changed) {
                out.insert(crate::tree::INNER_BLOCK.to_string(), Value::Bool(true));
            }
        }
        out
    }

    /// Render the inner block registered under `handle`, binding `arg`
    /// through its `:let` pattern. Raises a descriptive error when the
    /// pattern rejects the argument.
    pub fn render_inner_block(
        &self,
        assigns: &Assigns,
        handle: u64,
        arg: &Value,
    ) -> Result<Rendered, RenderError> {
        let instance = self
            .find_inner_block(handle)
            .unwrap_or_else(|| panic!("no inner block registered under {handle:016x}"));
        let body = instance.body.as_ref().expect("inner block without body");
        let mut scope = Scope::new(assigns);
        scope.push_frame();
        if let Some(let_pat) = &instance.let_pat {
            let mut bindings = Vec::new();
            let matched = eval::match_pattern(&let_pat.pat, arg, &mut bindings)
                .unwrap_or(false);
            if !matched {
                return Err(RenderError::LetMismatch {
                    pattern: let_pat.code.clone(),
                    value: arg.to_string(),
                });
            }
            for (name, bound) in bindings {
                scope.bind(name, bound);
            }
        }
        body.render_in_scope(&mut scope, None)
    }

    fn find_inner_block(&self, handle: u64) -> Option<&SlotInstance> {
        fn search_template(template: &Template, handle: u64) -> Option<&SlotInstance> {
            template
                .dynamics
                .iter()
                .find_map(|slot| search_slot(slot, handle))
        }
        fn search_instance(instance: &SlotInstance, handle: u64) -> Option<&SlotInstance> {
            if instance.handle == handle && instance.body.is_some() {
                return Some(instance);
            }
            instance
                .body
                .as_ref()
                .and_then(|body| search_template(body, handle))
        }
        fn search_slot(slot: &DynamicSlot, handle: u64) -> Option<&SlotInstance> {
            match slot {
                DynamicSlot::Block(block) => block
                    .arms
                    .iter()
                    .find_map(|arm| search_template(&arm.body, handle)),
                DynamicSlot::Loop(l) => search_template(&l.body, handle),
                DynamicSlot::Component(component) => component
                    .slots
                    .values()
                    .flatten()
                    .chain(component.inner_block.as_ref())
                    .find_map(|instance| search_instance(instance, handle)),
                _ => None,
            }
        }
        search_template(self, handle)
    }

    fn eval_in(&self, expr: &CompiledExpr, scope: &mut Scope<'_>) -> Result<Value, RenderError> {
        eval::eval(&expr.expr, scope).map_err(|source| self.eval_error(expr, source))
    }

    fn text_in(&self, expr: &CompiledExpr, value: &Value) -> Result<String, RenderError> {
        to_text(value).map_err(|source| self.eval_error(expr, source))
    }

    fn eval_error(&self, expr: &CompiledExpr, source: eval::EvalError) -> RenderError {
        RenderError::Eval {
            file: self.file.clone(),
            pos: expr.pos,
            expr: expr.code.clone(),
            source,
        }
    }
}

/// Aggregate keys of a slot instance: attrs, spreads, specials and body.
fn instance_keys_changed(
    instance: &SlotInstance,
    assigns: &Assigns,
    changed: &Map<String, Value>,
) -> bool {
    instance.entries.iter().any(|entry| match entry {
        ComponentEntry::Attr(attr) => attr.keys.changed(assigns, changed),
        ComponentEntry::Spread { keys, .. } => keys.changed(assigns, changed),
    }) || instance
        .body
        .as_ref()
        .is_some_and(|body| body.aggregate_keys().changed(assigns, changed))
}

impl Template {
    /// Union of every dynamic's keys; used for slot-dependency tracking.
    pub(crate) fn aggregate_keys(&self) -> Keys {
        self.dynamics
            .iter()
            .fold(Keys::Paths(Default::default()), |acc, slot| {
                acc.union(slot.keys().clone())
            })
    }
}
