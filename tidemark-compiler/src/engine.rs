//! The change-tracking engine: node tree to template IR.
//!
//! Walks the tree accumulating static text until a dynamic position forces
//! a split, runs taint analysis on every embedded expression, and emits one
//! IR slot per dynamic with the keys that guard its recomputation. Nested
//! constructs (control-flow arms, comprehension bodies, slot bodies)
//! compile to their own sub-templates with their own fingerprints; their
//! summaries fold into the enclosing slot across a scope boundary, so
//! variables bound inside them never taint the outer conditional.

use serde_json::Value;

use crate::attrs::{self, ClassifiedAttr};
use crate::calls::ComponentCall;
use crate::eex::{BlockKind, Marker};
use crate::errors::ParseError;
use crate::expr::{self, AssignRef};
use crate::source::Pos;
use crate::taint::{self, Keys, TaintSummary};
use crate::template::{
    BlockArm, BlockSlot, CompiledExpr, CompiledPat, ComponentAttr, ComponentEntry, ComponentSlot,
    ComponentValue, DynamicSlot, LoopSlot, SlotInstance, Template,
};
use crate::tokenizer::{AttrEntry, ExprSource};
use crate::tree::{EexBlock, Node, SpecialAttrs};
use crate::CompileOpts;
use indexmap::IndexMap;
use tidemark::{escape_html, Caller, FingerprintHasher};
use tracing::warn;

pub(crate) struct Compiler<'a> {
    opts: &'a CompileOpts,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(opts: &'a CompileOpts) -> Self {
        Self { opts }
    }

    pub(crate) fn compile(&self, nodes: &[Node]) -> Result<Template, ParseError> {
        let (mut template, _) = self.compile_body(nodes)?;
        if let Some((prefix, suffix)) = self.opts.handler.annotate_body() {
            if let Some(first) = template.statics.first_mut() {
                first.insert_str(0, &prefix);
            }
            if let Some(last) = template.statics.last_mut() {
                last.push_str(&suffix);
            }
            template.fingerprint = fingerprint_of(&template.statics, &template.dynamics);
        }
        template.root = self.opts.detect_root.then(|| detect_root(nodes));
        template.caller = Caller::Known {
            module: self.opts.caller_module.clone(),
            file: self.opts.file.clone(),
            line: self.opts.line,
        };
        Ok(template)
    }

    fn compile_body(&self, nodes: &[Node]) -> Result<(Template, TaintSummary), ParseError> {
        let mut body = Body::new();
        for node in nodes {
            self.node(node, &mut body)?;
        }
        Ok(body.finish(&self.opts.file))
    }

    fn node(&self, node: &Node, b: &mut Body) -> Result<(), ParseError> {
        match node {
            Node::Text { text, .. } => {
                b.text(text);
                Ok(())
            }
            Node::RawExpr { expr, marker } => self.raw_expr(expr, *marker, b),
            Node::Tag {
                name,
                attrs,
                special,
                children,
                ..
            } => self.wrapped(special, b, |c, b| {
                c.element(name, attrs, Some(children), b)
            }),
            Node::VoidTag {
                name,
                attrs,
                special,
                ..
            } => self.wrapped(special, b, |c, b| c.element(name, attrs, None, b)),
            Node::LocalComponent {
                name,
                attrs,
                special,
                slots,
                children,
                pos,
                ..
            } => self.wrapped(special, b, |c, b| {
                c.component(name.clone(), name == "live_component", attrs, special, slots, children, *pos, b)
            }),
            Node::RemoteComponent {
                module_path,
                fn_name,
                attrs,
                special,
                slots,
                children,
                pos,
                ..
            } => {
                let component_ref = format!("{}.{}", module_path.join("."), fn_name);
                self.wrapped(special, b, |c, b| {
                    c.component(component_ref.clone(), false, attrs, special, slots, children, *pos, b)
                })
            }
            Node::Slot { pos, .. } => Err(ParseError::new(
                &self.opts.file,
                *pos,
                "slots can only be direct children of a component",
            )),
            Node::Block(block) => self.block(block, b),
        }
    }

    fn raw_expr(&self, src: &ExprSource, marker: Marker, b: &mut Body) -> Result<(), ParseError> {
        let ce = self.compile_expr(src)?;
        match marker {
            Marker::Output => {
                if let Some(folded) = expr::const_fold(&ce.expr) {
                    // constant interpolations land in the statics
                    b.text(&escape_html(&folded));
                    return Ok(());
                }
                let summary = self.analyze(&ce);
                let keys = summary.keys();
                b.dynamic(DynamicSlot::Expr { expr: ce, keys }, summary);
            }
            Marker::Silent => {
                let summary = taint::analyze(&ce.expr);
                b.silent(ce, summary);
            }
        }
        Ok(())
    }

    /// Wrap an element or component in its `:for` / `:if` directives. With
    /// `:for`, an `:if` becomes a per-iteration filter.
    fn wrapped(
        &self,
        special: &SpecialAttrs,
        b: &mut Body,
        compile_inner: impl FnOnce(&Self, &mut Body) -> Result<(), ParseError>,
    ) -> Result<(), ParseError> {
        let head_src = match (&special.r#for, &special.r#if) {
            (None, None) => return compile_inner(self, b),
            (None, Some(head_src)) => Some(head_src),
            (Some(_), _) => None,
        };

        let mut inner = Body::new();
        compile_inner(self, &mut inner)?;
        let (inner_template, inner_summary) = inner.finish(&self.opts.file);

        if let Some(generator_src) = &special.r#for {
            let generator = expr::parse_generator(generator_src, &self.opts.file)?
                .ok_or_else(|| {
                    ParseError::new(
                        &self.opts.file,
                        generator_src.pos,
                        "`:for` expects a generator, like `item <- @items`",
                    )
                })?;
            let enumerable = CompiledExpr {
                expr: generator.expr,
                code: generator.expr_code,
                pos: generator.pos,
            };
            let pat = CompiledPat {
                pat: generator.pat,
                code: generator.pat_code,
                pos: generator.pos,
            };
            let filter = special
                .r#if
                .as_ref()
                .map(|src| self.compile_expr(src))
                .transpose()?;
            let key = special
                .key
                .as_ref()
                .map(|src| self.compile_expr(src))
                .transpose()?;

            let mut summary = self.analyze(&enumerable);
            for scoped in [&filter, &key].into_iter().flatten() {
                summary.merge_scoped(&taint::analyze(&scoped.expr));
            }
            summary.merge_scoped(&inner_summary);
            let keys = summary.keys();
            b.dynamic(
                DynamicSlot::Loop(Box::new(LoopSlot {
                    pat,
                    enumerable,
                    filter,
                    key,
                    body: inner_template,
                    keys,
                })),
                summary,
            );
            return Ok(());
        }

        let Some(head_src) = head_src else {
            // `:for` handled above; nothing else reaches here
            return Ok(());
        };
        let head = self.compile_expr(head_src)?;
        let pos = head.pos;
        let mut summary = self.analyze(&head);
        summary.merge_scoped(&inner_summary);
        let keys = summary.keys();
        b.dynamic(
            DynamicSlot::Block(Box::new(BlockSlot {
                kind: BlockKind::If,
                head: Some(head),
                arms: vec![
                    BlockArm {
                        pattern: None,
                        condition: None,
                        body: inner_template,
                    },
                    BlockArm {
                        pattern: None,
                        condition: None,
                        body: empty_template(&self.opts.file),
                    },
                ],
                keys,
                pos,
            })),
            summary,
        );
        Ok(())
    }

    /// A plain element: `children: None` marks a void tag, which never
    /// emits a closing tag (`<br>` and `<br/>` produce identical statics).
    fn element(
        &self,
        name: &str,
        attr_entries: &[AttrEntry],
        children: Option<&[Node]>,
        b: &mut Body,
    ) -> Result<(), ParseError> {
        b.text(&format!("<{name}"));
        for attr in attrs::classify(attr_entries, self.opts.caller_module.as_deref()) {
            match attr {
                ClassifiedAttr::Static { name, value } => {
                    b.text(&attrs::static_fragment(&name, &value));
                }
                ClassifiedAttr::Dynamic { name, expr: src } => {
                    let ce = self.compile_expr(&src)?;
                    if let Some(folded) = expr::const_fold(&ce.expr) {
                        b.text(&format!(" {name}=\"{}\"", escape_html(&folded)));
                        continue;
                    }
                    let summary = self.analyze(&ce);
                    let keys = summary.keys();
                    b.dynamic(DynamicSlot::Attr { name, expr: ce, keys }, summary);
                }
                ClassifiedAttr::Root { expr: src } => {
                    let ce = self.compile_expr(&src)?;
                    let summary = self.analyze(&ce);
                    let keys = summary.keys();
                    b.dynamic(DynamicSlot::Spread { expr: ce, keys }, summary);
                }
            }
        }
        b.text(">");
        if let Some(children) = children {
            for child in children {
                self.node(child, b)?;
            }
            b.text(&format!("</{name}>"));
        }
        Ok(())
    }

    fn block(&self, block: &EexBlock, b: &mut Body) -> Result<(), ParseError> {
        if block.marker == Marker::Silent {
            // a silent block discards its result and binds nothing outward
            return Ok(());
        }
        match block.kind {
            BlockKind::If | BlockKind::Unless => self.conditional(block, b),
            BlockKind::Case => self.case(block, b),
            BlockKind::Cond => self.cond(block, b),
            BlockKind::For => self.for_block(block, b),
        }
    }

    fn conditional(&self, block: &EexBlock, b: &mut Body) -> Result<(), ParseError> {
        let head = self.compile_expr(&block.head)?;
        let mut summary = self.analyze(&head);

        let (then_template, then_summary) = self.compile_body(&block.clauses[0].body)?;
        summary.merge_scoped(&then_summary);
        let else_template = match block.clauses.get(1) {
            Some(clause) => {
                let (template, else_summary) = self.compile_body(&clause.body)?;
                summary.merge_scoped(&else_summary);
                template
            }
            None => empty_template(&self.opts.file),
        };

        let keys = summary.keys();
        b.dynamic(
            DynamicSlot::Block(Box::new(BlockSlot {
                kind: block.kind,
                head: Some(head),
                arms: vec![
                    BlockArm {
                        pattern: None,
                        condition: None,
                        body: then_template,
                    },
                    BlockArm {
                        pattern: None,
                        condition: None,
                        body: else_template,
                    },
                ],
                keys,
                pos: block.pos,
            })),
            summary,
        );
        Ok(())
    }

    fn case(&self, block: &EexBlock, b: &mut Body) -> Result<(), ParseError> {
        let head = self.compile_expr(&block.head)?;
        let mut summary = self.analyze(&head);
        let mut arms = Vec::with_capacity(block.clauses.len());
        for clause in &block.clauses {
            let pattern_src = clause.pattern.as_ref().expect("case clause without pattern");
            let pat = expr::parse_pattern(pattern_src, &self.opts.file)?;
            let (body, body_summary) = self.compile_body(&clause.body)?;
            summary.merge_scoped(&body_summary);
            arms.push(BlockArm {
                pattern: Some(CompiledPat {
                    pat,
                    code: pattern_src.code.clone(),
                    pos: pattern_src.pos,
                }),
                condition: None,
                body,
            });
        }
        let keys = summary.keys();
        b.dynamic(
            DynamicSlot::Block(Box::new(BlockSlot {
                kind: BlockKind::Case,
                head: Some(head),
                arms,
                keys,
                pos: block.pos,
            })),
            summary,
        );
        Ok(())
    }

    fn cond(&self, block: &EexBlock, b: &mut Body) -> Result<(), ParseError> {
        let mut summary = TaintSummary::default();
        let mut arms = Vec::with_capacity(block.clauses.len());
        for clause in &block.clauses {
            let condition_src = clause.pattern.as_ref().expect("cond clause without condition");
            let condition = self.compile_expr(condition_src)?;
            summary.merge_scoped(&taint::analyze(&condition.expr));
            let (body, body_summary) = self.compile_body(&clause.body)?;
            summary.merge_scoped(&body_summary);
            arms.push(BlockArm {
                pattern: None,
                condition: Some(condition),
                body,
            });
        }
        let keys = summary.keys();
        b.dynamic(
            DynamicSlot::Block(Box::new(BlockSlot {
                kind: BlockKind::Cond,
                head: None,
                arms,
                keys,
                pos: block.pos,
            })),
            summary,
        );
        Ok(())
    }

    fn for_block(&self, block: &EexBlock, b: &mut Body) -> Result<(), ParseError> {
        let generator = expr::parse_generator(&block.head, &self.opts.file)?.ok_or_else(|| {
            ParseError::new(
                &self.opts.file,
                block.head.pos,
                "`for` expects a generator, like `item <- @items`",
            )
        })?;
        let enumerable = CompiledExpr {
            expr: generator.expr,
            code: generator.expr_code,
            pos: generator.pos,
        };
        let mut summary = self.analyze(&enumerable);
        let (body, body_summary) = self.compile_body(&block.clauses[0].body)?;
        summary.merge_scoped(&body_summary);
        let keys = summary.keys();
        b.dynamic(
            DynamicSlot::Loop(Box::new(LoopSlot {
                pat: CompiledPat {
                    pat: generator.pat,
                    code: generator.pat_code,
                    pos: generator.pos,
                },
                enumerable,
                filter: None,
                key: None,
                body,
                keys,
            })),
            summary,
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn component(
        &self,
        component_ref: String,
        stateful: bool,
        attr_entries: &[AttrEntry],
        special: &SpecialAttrs,
        slot_nodes: &[Node],
        children: &[Node],
        pos: Pos,
        b: &mut Body,
    ) -> Result<(), ParseError> {
        let mut summary = TaintSummary::default();
        let mut entries = Vec::new();
        for attr in attrs::classify(attr_entries, self.opts.caller_module.as_deref()) {
            entries.push(self.component_entry(attr, &mut summary)?);
        }

        let mut slots: IndexMap<String, Vec<SlotInstance>> = IndexMap::new();
        for slot_node in slot_nodes {
            let instance = self.slot_instance(slot_node, &mut summary)?;
            slots.entry(instance.name.clone()).or_default().push(instance);
        }

        let has_body = children.iter().any(|child| !child.is_blank_text());
        if special.r#let.is_some() && !has_body {
            return Err(ParseError::new(
                &self.opts.file,
                pos,
                "cannot use `:let` on a component without inner content",
            ));
        }
        let inner_block = if has_body {
            Some(self.inner_block_instance(
                crate::tree::INNER_BLOCK,
                Vec::new(),
                None,
                None,
                special.r#let.as_ref(),
                children,
                &mut summary,
            )?)
        } else {
            None
        };

        self.record_call(&component_ref, pos, &entries, &slots);
        if let Some(annotation) = self
            .opts
            .handler
            .annotate_caller(&self.opts.file, pos.line)
        {
            b.text(&annotation);
        }

        let keys = summary.keys();
        b.dynamic(
            DynamicSlot::Component(Box::new(ComponentSlot {
                component_ref,
                stateful,
                entries,
                slots,
                inner_block,
                keys,
                pos,
            })),
            summary,
        );
        Ok(())
    }

    fn component_entry(
        &self,
        attr: ClassifiedAttr,
        summary: &mut TaintSummary,
    ) -> Result<ComponentEntry, ParseError> {
        match attr {
            ClassifiedAttr::Static { name, value } => Ok(ComponentEntry::Attr(ComponentAttr {
                name,
                value: ComponentValue::Literal(match value {
                    Some((text, _)) => Value::String(text),
                    None => Value::Bool(true),
                }),
                keys: Keys::Paths(Default::default()),
                path: None,
            })),
            ClassifiedAttr::Dynamic { name, expr: src } => {
                let ce = self.compile_expr(&src)?;
                let attr_summary = self.analyze(&ce);
                summary.merge(&attr_summary);
                let path = match expr::assign_ref(&ce.expr) {
                    Some(AssignRef::Path(path)) => Some(path),
                    _ => None,
                };
                Ok(ComponentEntry::Attr(ComponentAttr {
                    name,
                    keys: attr_summary.keys(),
                    path,
                    value: ComponentValue::Expr(ce),
                }))
            }
            ClassifiedAttr::Root { expr: src } => {
                let ce = self.compile_expr(&src)?;
                let spread_summary = self.analyze(&ce);
                summary.merge(&spread_summary);
                Ok(ComponentEntry::Spread {
                    keys: spread_summary.keys(),
                    expr: ce,
                })
            }
        }
    }

    fn slot_instance(
        &self,
        node: &Node,
        summary: &mut TaintSummary,
    ) -> Result<SlotInstance, ParseError> {
        let Node::Slot {
            name,
            attrs: attr_entries,
            special,
            children,
            pos,
            ..
        } = node
        else {
            unreachable!("slot nodes are partitioned by the analyzer");
        };

        let has_body = children.iter().any(|child| !child.is_blank_text());
        if special.r#let.is_some() && !has_body {
            return Err(ParseError::new(
                &self.opts.file,
                *pos,
                "cannot use `:let` on a slot without inner content",
            ));
        }

        let mut entries = Vec::new();
        for attr in attrs::classify(attr_entries, self.opts.caller_module.as_deref()) {
            entries.push(self.component_entry(attr, summary)?);
        }

        let filter_if = special
            .r#if
            .as_ref()
            .map(|src| self.compile_expr(src))
            .transpose()?;
        if let Some(filter) = &filter_if {
            summary.merge_scoped(&taint::analyze(&filter.expr));
        }
        let repeat_for = match &special.r#for {
            Some(generator_src) => {
                let generator = expr::parse_generator(generator_src, &self.opts.file)?
                    .ok_or_else(|| {
                        ParseError::new(
                            &self.opts.file,
                            generator_src.pos,
                            "`:for` expects a generator, like `item <- @items`",
                        )
                    })?;
                summary.merge(&taint::analyze(&generator.expr));
                Some((
                    CompiledPat {
                        pat: generator.pat,
                        code: generator.pat_code,
                        pos: generator.pos,
                    },
                    CompiledExpr {
                        expr: generator.expr,
                        code: generator.expr_code,
                        pos: generator.pos,
                    },
                ))
            }
            None => None,
        };

        self.inner_block_instance(
            name,
            entries,
            filter_if,
            repeat_for,
            special.r#let.as_ref(),
            children,
            summary,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn inner_block_instance(
        &self,
        name: &str,
        entries: Vec<ComponentEntry>,
        filter_if: Option<CompiledExpr>,
        repeat_for: Option<(CompiledPat, CompiledExpr)>,
        let_src: Option<&ExprSource>,
        children: &[Node],
        summary: &mut TaintSummary,
    ) -> Result<SlotInstance, ParseError> {
        let let_pat = match let_src {
            Some(src) => Some(CompiledPat {
                pat: expr::parse_pattern(src, &self.opts.file)?,
                code: src.code.clone(),
                pos: src.pos,
            }),
            None => None,
        };
        let has_body = children.iter().any(|child| !child.is_blank_text());
        let body = if has_body {
            let (template, body_summary) = self.compile_body(children)?;
            summary.merge_scoped(&body_summary);
            Some(template)
        } else {
            None
        };
        let handle = body
            .as_ref()
            .map(|template| template.fingerprint() as u64)
            .unwrap_or(0);
        Ok(SlotInstance {
            name: name.to_string(),
            entries,
            filter_if,
            repeat_for,
            let_pat,
            body,
            handle,
        })
    }

    fn record_call(
        &self,
        component_ref: &str,
        pos: Pos,
        entries: &[ComponentEntry],
        slots: &IndexMap<String, Vec<SlotInstance>>,
    ) {
        let Some(registry) = &self.opts.registry else {
            return;
        };
        registry.record(ComponentCall {
            file: self.opts.file.clone(),
            line: pos.line,
            component: component_ref.to_string(),
            attrs: entries
                .iter()
                .filter_map(|entry| match entry {
                    ComponentEntry::Attr(attr) => Some(attr.name.clone()),
                    ComponentEntry::Spread { .. } => None,
                })
                .collect(),
            slots: slots.keys().cloned().collect(),
        });
    }

    fn compile_expr(&self, src: &ExprSource) -> Result<CompiledExpr, ParseError> {
        let parsed = expr::parse_expr(src, &self.opts.file)?;
        Ok(CompiledExpr {
            expr: parsed,
            code: src.code.trim().to_string(),
            pos: src.pos,
        })
    }

    /// Analyze and surface the local-variable warning: a template local in
    /// a tracked fragment turns its condition into "always recompute".
    fn analyze(&self, ce: &CompiledExpr) -> TaintSummary {
        let summary = taint::analyze(&ce.expr);
        for name in &summary.tainted_vars {
            warn!(
                file = self.opts.file.as_str(),
                line = ce.pos.line,
                "variable `{name}` is used in the template; change tracking for \
                 this fragment is disabled"
            );
        }
        summary
    }
}

/// Accumulates alternating statics and dynamics for one template body.
struct Body {
    acc: String,
    statics: Vec<String>,
    dynamics: Vec<DynamicSlot>,
    silents: Vec<(usize, CompiledExpr)>,
    summary: TaintSummary,
}

impl Body {
    fn new() -> Self {
        Self {
            acc: String::new(),
            statics: Vec::new(),
            dynamics: Vec::new(),
            silents: Vec::new(),
            summary: TaintSummary::default(),
        }
    }

    fn text(&mut self, s: &str) {
        self.acc.push_str(s);
    }

    fn dynamic(&mut self, slot: DynamicSlot, summary: TaintSummary) {
        self.statics.push(std::mem::take(&mut self.acc));
        self.dynamics.push(slot);
        self.summary.merge(&summary);
    }

    fn silent(&mut self, expr: CompiledExpr, summary: TaintSummary) {
        self.silents.push((self.dynamics.len(), expr));
        self.summary.merge(&summary);
    }

    fn finish(mut self, file: &str) -> (Template, TaintSummary) {
        self.statics.push(self.acc);
        let fingerprint = fingerprint_of(&self.statics, &self.dynamics);
        (
            Template {
                statics: self.statics,
                dynamics: self.dynamics,
                silents: self.silents,
                fingerprint,
                root: None,
                caller: Caller::Unavailable,
                file: file.to_string(),
            },
            self.summary,
        )
    }
}

fn empty_template(file: &str) -> Template {
    Body::new().finish(file).0
}

/// Fingerprint over the byte-exact static list and the structural identity
/// of each dynamic: its kind, its expression source, and the fingerprints
/// of nested templates. Positions never contribute, so identical sources
/// fingerprint identically across processes; distinct branch bodies get
/// distinct fingerprints even when their static shapes coincide.
fn fingerprint_of(statics: &[String], dynamics: &[DynamicSlot]) -> u128 {
    let mut hasher = FingerprintHasher::new();
    for static_part in statics {
        hasher.update_str(static_part);
    }
    hasher.update_u8(0xff);
    for slot in dynamics {
        match slot {
            DynamicSlot::Expr { expr, .. } => {
                hasher.update_u8(1);
                hasher.update_str(&expr.code);
            }
            DynamicSlot::Attr { name, expr, .. } => {
                hasher.update_u8(2);
                hasher.update_str(name);
                hasher.update_str(&expr.code);
            }
            DynamicSlot::Spread { expr, .. } => {
                hasher.update_u8(3);
                hasher.update_str(&expr.code);
            }
            DynamicSlot::Block(block) => {
                hasher.update_u8(4);
                for arm in &block.arms {
                    hasher.update_u128(arm.body.fingerprint());
                }
            }
            DynamicSlot::Loop(l) => {
                hasher.update_u8(5);
                hasher.update_u128(l.body.fingerprint());
            }
            DynamicSlot::Component(component) => {
                hasher.update_u8(6);
                hasher.update_str(&component.component_ref);
                hasher.update_u8(component.stateful as u8);
                for (name, instances) in &component.slots {
                    hasher.update_str(name);
                    for instance in instances {
                        hasher.update_u128(instance.handle as u128);
                    }
                }
            }
        }
    }
    hasher.finish()
}

/// The template's root hint: a single static element wrapping everything.
fn detect_root(nodes: &[Node]) -> bool {
    let significant: Vec<&Node> = nodes.iter().filter(|n| !n.is_blank_text()).collect();
    if significant.len() != 1 {
        return false;
    }
    match significant[0] {
        Node::Tag { special, .. } | Node::VoidTag { special, .. } => {
            special.r#if.is_none() && special.r#for.is_none()
        }
        _ => false,
    }
}
