//! Generic structural transform over abstract values.
//!
//! A transform is a *variant*: a type implementing [`CloneVariant`] (or
//! [`AsyncCloneVariant`]) that overrides the methods for the kinds it cares
//! about. Every method defaults to the structural recursion of the
//! matching `CloneContext::default_*` helper, which an override may also call
//! to recurse before or after doing its own work.
//!
//! The traversal is memoized by input identity, so shared sub-values map to
//! a single output and each node is visited once. A node reached again while
//! it is still being rebuilt receives a placeholder, completed with the
//! node's output once that is known; cyclic inputs therefore give cyclic
//! outputs. When no child changes, the input node itself is returned.
//!
//! The synchronous form leaves pendings untouched. The asynchronous form
//! waits for every pending it meets and rebuilds with the resolved value; a
//! node is published in the memo table only once it is fully rebuilt.

use std::collections::HashMap;

use futures_util::future::{FutureExt, LocalBoxFuture};

use crate::abstract_value::{
    abstract_union, AbstractKind, AbstractValue, Candidate, ErrorReason, FunctionRef,
    Possibilities, Shape, Slot,
};
use crate::error::InferResult;
use crate::types::Type;

/// Per-kind overrides of the synchronous transform.
pub trait CloneVariant {
    fn scalar(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        value: &Slot,
        ty: &Type,
    ) -> InferResult<AbstractValue> {
        cx.default_scalar(self, av, value, ty)
    }

    fn tuple(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        items: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        cx.default_tuple(self, av, items)
    }

    fn list(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        element: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        cx.default_list(self, av, element)
    }

    fn array(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        element: &AbstractValue,
        shape: &Shape,
    ) -> InferResult<AbstractValue> {
        cx.default_array(self, av, element, shape)
    }

    fn class(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        tag: &str,
        fields: &[(String, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        cx.default_class(self, av, tag, fields)
    }

    fn union(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        members: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        cx.default_union(self, av, members)
    }

    fn tagged_union(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        options: &[(u32, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        cx.default_tagged_union(self, av, options)
    }

    fn function(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        slot: &Slot,
    ) -> InferResult<AbstractValue> {
        cx.default_function(self, av, slot)
    }

    fn jtagged(
        &mut self,
        cx: &mut CloneContext,
        av: &AbstractValue,
        inner: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        cx.default_jtagged(self, av, inner)
    }

    fn error(
        &mut self,
        _cx: &mut CloneContext,
        av: &AbstractValue,
        _reason: &ErrorReason,
    ) -> InferResult<AbstractValue> {
        Ok(av.clone())
    }

    fn ty(
        &mut self,
        _cx: &mut CloneContext,
        av: &AbstractValue,
        _ty: &Type,
    ) -> InferResult<AbstractValue> {
        Ok(av.clone())
    }

    /// VALUE track of scalars and option set of functions.
    fn slot(&mut self, cx: &mut CloneContext, slot: &Slot) -> InferResult<Slot> {
        cx.default_slot(self, slot)
    }

    fn function_ref(
        &mut self,
        cx: &mut CloneContext,
        func: &FunctionRef,
    ) -> InferResult<FunctionRef> {
        cx.default_function_ref(self, func)
    }
}

/// The transform with no overrides.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityClone;

impl CloneVariant for IdentityClone {}

/// Memo table shared by the synchronous and asynchronous traversals.
#[derive(Default)]
struct Memo {
    /// Input address to (input, output). The input is kept so its address
    /// stays unique for the lifetime of the traversal.
    done: HashMap<usize, (AbstractValue, AbstractValue)>,
    /// Nodes being rebuilt, with the placeholder handed out for them if
    /// they were reached again.
    in_progress: HashMap<usize, Option<AbstractValue>>,
}

impl Memo {
    /// Output for `av` if it is already known or must be a placeholder.
    fn lookup(&mut self, av: &AbstractValue) -> Option<AbstractValue> {
        let addr = av.addr();
        if let Some((_, out)) = self.done.get(&addr) {
            return Some(out.clone());
        }
        self.in_progress
            .get_mut(&addr)
            .map(|ph| ph.get_or_insert_with(AbstractValue::placeholder).clone())
    }

    fn start(&mut self, av: &AbstractValue) {
        self.in_progress.insert(av.addr(), None);
    }

    fn finish(
        &mut self,
        av: &AbstractValue,
        result: InferResult<AbstractValue>,
    ) -> InferResult<AbstractValue> {
        let placeholder = self.in_progress.remove(&av.addr()).flatten();
        let out = result?;
        let out = match placeholder {
            Some(ph) if !out.ptr_eq(&ph) => {
                ph.complete(out.kind().clone())?;
                // A cycle rebuilt without changes is the input itself.
                if ph == *av {
                    av.clone()
                } else {
                    ph
                }
            }
            _ => out,
        };
        self.done.insert(av.addr(), (av.clone(), out.clone()));
        Ok(out)
    }
}

fn unchanged(old: &[AbstractValue], new: &[AbstractValue]) -> bool {
    old.iter().zip(new).all(|(x, y)| x.ptr_eq(y))
}

/// State of one synchronous traversal.
#[derive(Default)]
pub struct CloneContext {
    memo: Memo,
}

impl std::fmt::Debug for CloneContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneContext")
            .field("done", &self.memo.done.len())
            .field("in_progress", &self.memo.in_progress.len())
            .finish()
    }
}

impl CloneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform `av`, reusing the result of an earlier visit of the same
    /// node.
    pub fn visit<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        if let Some(out) = self.memo.lookup(av) {
            return Ok(out);
        }
        self.memo.start(av);
        let result = self.dispatch(v, av);
        self.memo.finish(av, result)
    }

    fn dispatch<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        match av.kind() {
            AbstractKind::Scalar { value, ty } => v.scalar(self, av, value, ty),
            AbstractKind::Tuple(items) => v.tuple(self, av, items),
            AbstractKind::List(element) => v.list(self, av, element),
            AbstractKind::Array { element, shape } => v.array(self, av, element, shape),
            AbstractKind::Class { tag, fields } => v.class(self, av, tag, fields),
            AbstractKind::Union(members) => v.union(self, av, members),
            AbstractKind::TaggedUnion(options) => v.tagged_union(self, av, options),
            AbstractKind::Function(slot) => v.function(self, av, slot),
            AbstractKind::JTagged(inner) => v.jtagged(self, av, inner),
            AbstractKind::Error(reason) => v.error(self, av, reason),
            AbstractKind::Ty(ty) => v.ty(self, av, ty),
        }
    }

    fn visit_all<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        items: &[AbstractValue],
    ) -> InferResult<Vec<AbstractValue>> {
        items.iter().map(|item| self.visit(v, item)).collect()
    }

    pub fn default_scalar<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        value: &Slot,
        ty: &Type,
    ) -> InferResult<AbstractValue> {
        let new = v.slot(self, value)?;
        if new.same_as(value) {
            Ok(av.clone())
        } else {
            AbstractValue::scalar(new, ty.clone())
        }
    }

    pub fn default_tuple<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        items: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        let new = self.visit_all(v, items)?;
        Ok(if unchanged(items, &new) {
            av.clone()
        } else {
            AbstractValue::tuple(new)
        })
    }

    pub fn default_list<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        element: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        let new = self.visit(v, element)?;
        Ok(if new.ptr_eq(element) {
            av.clone()
        } else {
            AbstractValue::list(new)
        })
    }

    pub fn default_array<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        element: &AbstractValue,
        shape: &Shape,
    ) -> InferResult<AbstractValue> {
        let new = self.visit(v, element)?;
        Ok(if new.ptr_eq(element) {
            av.clone()
        } else {
            AbstractValue::array(new, shape.clone())
        })
    }

    pub fn default_class<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        tag: &str,
        fields: &[(String, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        let mut changed = false;
        let mut new = Vec::with_capacity(fields.len());
        for (name, field) in fields {
            let out = self.visit(v, field)?;
            changed |= !out.ptr_eq(field);
            new.push((name.clone(), out));
        }
        if changed {
            AbstractValue::class(tag, new)
        } else {
            Ok(av.clone())
        }
    }

    /// Members are re-normalized, so a union whose members become equal
    /// collapses.
    pub fn default_union<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        members: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        let new = self.visit_all(v, members)?;
        if unchanged(members, &new) {
            Ok(av.clone())
        } else {
            abstract_union(new)
        }
    }

    pub fn default_tagged_union<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        options: &[(u32, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        let mut changed = false;
        let mut new = Vec::with_capacity(options.len());
        for (tag, option) in options {
            let out = self.visit(v, option)?;
            changed |= !out.ptr_eq(option);
            new.push((*tag, out));
        }
        if changed {
            AbstractValue::tagged_union(new)
        } else {
            Ok(av.clone())
        }
    }

    pub fn default_function<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        slot: &Slot,
    ) -> InferResult<AbstractValue> {
        let new = v.slot(self, slot)?;
        if new.same_as(slot) {
            Ok(av.clone())
        } else {
            AbstractValue::function(new)
        }
    }

    pub fn default_jtagged<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        inner: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        let new = self.visit(v, inner)?;
        Ok(if new.ptr_eq(inner) {
            av.clone()
        } else {
            AbstractValue::jtagged(new)
        })
    }

    /// Rebuild the function candidates of a slot; constants and pendings
    /// are kept.
    pub fn default_slot<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        slot: &Slot,
    ) -> InferResult<Slot> {
        let Slot::Possibilities(p) = slot else {
            return Ok(slot.clone());
        };
        let mut changed = false;
        let mut new = Vec::with_capacity(p.len());
        for candidate in p.iter() {
            match candidate {
                Candidate::Function(f) => {
                    let out = v.function_ref(self, f)?;
                    changed |= out != *f;
                    new.push(Candidate::Function(out));
                }
                Candidate::Value(_) => new.push(candidate.clone()),
            }
        }
        if changed {
            Ok(Slot::Possibilities(Possibilities::new(new)?))
        } else {
            Ok(slot.clone())
        }
    }

    pub fn default_function_ref<V: CloneVariant + ?Sized>(
        &mut self,
        v: &mut V,
        func: &FunctionRef,
    ) -> InferResult<FunctionRef> {
        Ok(match func {
            FunctionRef::Primitive(_) | FunctionRef::Graph { .. } => func.clone(),
            FunctionRef::TypedPrimitive { prim, args, output } => FunctionRef::TypedPrimitive {
                prim: prim.clone(),
                args: self.visit_all(v, args)?,
                output: self.visit(v, output)?,
            },
            FunctionRef::Partial { func: inner, args } => FunctionRef::Partial {
                func: Box::new(v.function_ref(self, inner)?),
                args: self.visit_all(v, args)?,
            },
            FunctionRef::Virtual { args, output } => FunctionRef::Virtual {
                args: self.visit_all(v, args)?,
                output: self.visit(v, output)?,
            },
        })
    }
}

/// Transform `av` with `variant`.
pub fn abstract_clone<V: CloneVariant + ?Sized>(
    variant: &mut V,
    av: &AbstractValue,
) -> InferResult<AbstractValue> {
    CloneContext::new().visit(variant, av)
}

/// Per-kind overrides of the suspension-aware transform.
///
/// Overrides may await; in particular the default VALUE handling waits for
/// pendings, so the transform must run inside an
/// [`crate::scheduler::InferenceLoop`].
#[allow(async_fn_in_trait)]
pub trait AsyncCloneVariant: Sized {
    async fn scalar(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        value: &Slot,
        ty: &Type,
    ) -> InferResult<AbstractValue> {
        cx.default_scalar(self, av, value, ty).await
    }

    async fn tuple(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        items: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        cx.default_tuple(self, av, items).await
    }

    async fn list(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        element: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        cx.default_list(self, av, element).await
    }

    async fn array(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        element: &AbstractValue,
        shape: &Shape,
    ) -> InferResult<AbstractValue> {
        cx.default_array(self, av, element, shape).await
    }

    async fn class(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        tag: &str,
        fields: &[(String, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        cx.default_class(self, av, tag, fields).await
    }

    async fn union(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        members: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        cx.default_union(self, av, members).await
    }

    async fn tagged_union(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        options: &[(u32, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        cx.default_tagged_union(self, av, options).await
    }

    async fn function(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        slot: &Slot,
    ) -> InferResult<AbstractValue> {
        cx.default_function(self, av, slot).await
    }

    async fn jtagged(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        inner: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        cx.default_jtagged(self, av, inner).await
    }

    async fn error(
        &mut self,
        _cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        _reason: &ErrorReason,
    ) -> InferResult<AbstractValue> {
        Ok(av.clone())
    }

    async fn ty(
        &mut self,
        _cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        _ty: &Type,
    ) -> InferResult<AbstractValue> {
        Ok(av.clone())
    }

    async fn slot(&mut self, cx: &mut AsyncCloneContext, slot: &Slot) -> InferResult<Slot> {
        cx.default_slot(self, slot).await
    }

    async fn function_ref(
        &mut self,
        cx: &mut AsyncCloneContext,
        func: &FunctionRef,
    ) -> InferResult<FunctionRef> {
        cx.default_function_ref(self, func).await
    }
}

/// State of one asynchronous traversal.
#[derive(Default)]
pub struct AsyncCloneContext {
    memo: Memo,
}

impl std::fmt::Debug for AsyncCloneContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCloneContext")
            .field("done", &self.memo.done.len())
            .field("in_progress", &self.memo.in_progress.len())
            .finish()
    }
}

impl AsyncCloneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform `av`. Boxed, since the traversal recurses through it.
    pub fn visit<'a, V: AsyncCloneVariant>(
        &'a mut self,
        v: &'a mut V,
        av: &'a AbstractValue,
    ) -> LocalBoxFuture<'a, InferResult<AbstractValue>> {
        async move {
            if let Some(out) = self.memo.lookup(av) {
                return Ok(out);
            }
            self.memo.start(av);
            let result = self.dispatch(v, av).await;
            self.memo.finish(av, result)
        }
        .boxed_local()
    }

    async fn dispatch<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        match av.kind() {
            AbstractKind::Scalar { value, ty } => v.scalar(self, av, value, ty).await,
            AbstractKind::Tuple(items) => v.tuple(self, av, items).await,
            AbstractKind::List(element) => v.list(self, av, element).await,
            AbstractKind::Array { element, shape } => v.array(self, av, element, shape).await,
            AbstractKind::Class { tag, fields } => v.class(self, av, tag, fields).await,
            AbstractKind::Union(members) => v.union(self, av, members).await,
            AbstractKind::TaggedUnion(options) => v.tagged_union(self, av, options).await,
            AbstractKind::Function(slot) => v.function(self, av, slot).await,
            AbstractKind::JTagged(inner) => v.jtagged(self, av, inner).await,
            AbstractKind::Error(reason) => v.error(self, av, reason).await,
            AbstractKind::Ty(ty) => v.ty(self, av, ty).await,
        }
    }

    async fn visit_all<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        items: &[AbstractValue],
    ) -> InferResult<Vec<AbstractValue>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.visit(v, item).await?);
        }
        Ok(out)
    }

    pub async fn default_scalar<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        value: &Slot,
        ty: &Type,
    ) -> InferResult<AbstractValue> {
        let new = v.slot(self, value).await?;
        if new.same_as(value) {
            Ok(av.clone())
        } else {
            AbstractValue::scalar(new, ty.clone())
        }
    }

    pub async fn default_tuple<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        items: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        let new = self.visit_all(v, items).await?;
        Ok(if unchanged(items, &new) {
            av.clone()
        } else {
            AbstractValue::tuple(new)
        })
    }

    pub async fn default_list<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        element: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        let new = self.visit(v, element).await?;
        Ok(if new.ptr_eq(element) {
            av.clone()
        } else {
            AbstractValue::list(new)
        })
    }

    pub async fn default_array<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        element: &AbstractValue,
        shape: &Shape,
    ) -> InferResult<AbstractValue> {
        let new = self.visit(v, element).await?;
        Ok(if new.ptr_eq(element) {
            av.clone()
        } else {
            AbstractValue::array(new, shape.clone())
        })
    }

    pub async fn default_class<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        tag: &str,
        fields: &[(String, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        let mut changed = false;
        let mut new = Vec::with_capacity(fields.len());
        for (name, field) in fields {
            let out = self.visit(v, field).await?;
            changed |= !out.ptr_eq(field);
            new.push((name.clone(), out));
        }
        if changed {
            AbstractValue::class(tag, new)
        } else {
            Ok(av.clone())
        }
    }

    pub async fn default_union<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        members: &[AbstractValue],
    ) -> InferResult<AbstractValue> {
        let new = self.visit_all(v, members).await?;
        if unchanged(members, &new) {
            Ok(av.clone())
        } else {
            abstract_union(new)
        }
    }

    pub async fn default_tagged_union<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        options: &[(u32, AbstractValue)],
    ) -> InferResult<AbstractValue> {
        let mut changed = false;
        let mut new = Vec::with_capacity(options.len());
        for (tag, option) in options {
            let out = self.visit(v, option).await?;
            changed |= !out.ptr_eq(option);
            new.push((*tag, out));
        }
        if changed {
            AbstractValue::tagged_union(new)
        } else {
            Ok(av.clone())
        }
    }

    pub async fn default_function<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        slot: &Slot,
    ) -> InferResult<AbstractValue> {
        let new = v.slot(self, slot).await?;
        if new.same_as(slot) {
            Ok(av.clone())
        } else {
            AbstractValue::function(new)
        }
    }

    pub async fn default_jtagged<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        av: &AbstractValue,
        inner: &AbstractValue,
    ) -> InferResult<AbstractValue> {
        let new = self.visit(v, inner).await?;
        Ok(if new.ptr_eq(inner) {
            av.clone()
        } else {
            AbstractValue::jtagged(new)
        })
    }

    /// Waits for a pending slot, then rebuilds function candidates.
    pub async fn default_slot<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        slot: &Slot,
    ) -> InferResult<Slot> {
        let resolved = match slot {
            Slot::Pending(_) => slot.wait().await?,
            _ => slot.clone(),
        };
        let Slot::Possibilities(p) = &resolved else {
            return Ok(resolved);
        };
        let mut changed = false;
        let mut new = Vec::with_capacity(p.len());
        for candidate in p.iter() {
            match candidate {
                Candidate::Function(f) => {
                    let out = v.function_ref(self, f).await?;
                    changed |= out != *f;
                    new.push(Candidate::Function(out));
                }
                Candidate::Value(_) => new.push(candidate.clone()),
            }
        }
        if changed {
            Ok(Slot::Possibilities(Possibilities::new(new)?))
        } else {
            Ok(resolved)
        }
    }

    pub async fn default_function_ref<V: AsyncCloneVariant>(
        &mut self,
        v: &mut V,
        func: &FunctionRef,
    ) -> InferResult<FunctionRef> {
        Ok(match func {
            FunctionRef::Primitive(_) | FunctionRef::Graph { .. } => func.clone(),
            FunctionRef::TypedPrimitive { prim, args, output } => FunctionRef::TypedPrimitive {
                prim: prim.clone(),
                args: self.visit_all(v, args).await?,
                output: self.visit(v, output).await?,
            },
            FunctionRef::Partial { func: inner, args } => {
                let nested: LocalBoxFuture<'_, InferResult<FunctionRef>> =
                    v.function_ref(self, inner).boxed_local();
                let inner = nested.await?;
                FunctionRef::Partial {
                    func: Box::new(inner),
                    args: self.visit_all(v, args).await?,
                }
            }
            FunctionRef::Virtual { args, output } => FunctionRef::Virtual {
                args: self.visit_all(v, args).await?,
                output: self.visit(v, output).await?,
            },
        })
    }
}

/// Transform `av` with `variant`, waiting on pendings as they are met.
pub async fn abstract_clone_async<V: AsyncCloneVariant>(
    variant: &mut V,
    av: &AbstractValue,
) -> InferResult<AbstractValue> {
    AsyncCloneContext::new().visit(variant, av).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::InferenceLoop;

    /// Rewrites every integer scalar to `Int[64]`.
    struct Upcast;

    impl CloneVariant for Upcast {
        fn scalar(
            &mut self,
            _cx: &mut CloneContext,
            av: &AbstractValue,
            value: &Slot,
            ty: &Type,
        ) -> InferResult<AbstractValue> {
            match ty {
                Type::Int(bits) if *bits != 64 => AbstractValue::scalar(value.clone(), Type::I64),
                _ => Ok(av.clone()),
            }
        }
    }

    #[test]
    fn test_identity_returns_same_instance() {
        let x = AbstractValue::any_of(Type::I32);
        let t = AbstractValue::tuple(vec![x.clone(), AbstractValue::list(x)]);
        let out = abstract_clone(&mut IdentityClone, &t).unwrap();
        assert!(out.ptr_eq(&t));
    }

    #[test]
    fn test_sharing_preserved() {
        let node = AbstractValue::placeholder();
        node.complete(AbstractKind::List(node.clone())).unwrap();
        let t = AbstractValue::tuple(vec![node.clone(), node]);
        let out = abstract_clone(&mut Upcast, &t).unwrap();
        let AbstractKind::Tuple(items) = out.kind() else {
            panic!("expected a tuple");
        };
        assert!(items[0].ptr_eq(&items[1]));
        assert_eq!(out, t);
    }

    #[test]
    fn test_cycle_through_rewritten_node() {
        let node = AbstractValue::placeholder();
        node.complete(AbstractKind::Tuple(vec![
            AbstractValue::any_of(Type::I32),
            AbstractValue::list(node.clone()),
        ]))
        .unwrap();
        let out = abstract_clone(&mut Upcast, &node).unwrap();
        assert_eq!(out.to_string(), "T(S(TYPE=Int[64]), L(#rec))");
        let AbstractKind::Tuple(items) = out.kind() else {
            panic!("expected a tuple");
        };
        let AbstractKind::List(inner) = items[1].kind() else {
            panic!("expected a list");
        };
        assert!(inner.ptr_eq(&out));
    }

    #[test]
    fn test_unchanged_cycle_is_kept() {
        let node = AbstractValue::placeholder();
        node.complete(AbstractKind::Tuple(vec![
            AbstractValue::any_of(Type::I64),
            AbstractValue::list(node.clone()),
        ]))
        .unwrap();
        assert!(abstract_clone(&mut Upcast, &node).unwrap().ptr_eq(&node));
        assert!(abstract_clone(&mut IdentityClone, &node)
            .unwrap()
            .ptr_eq(&node));
    }

    #[test]
    fn test_async_waits_for_pending() {
        let lp = InferenceLoop::default();
        let p = lp.create_pending(|| Ok(Slot::from(5i64)), || None);
        let av = AbstractValue::scalar(p, Type::I64).unwrap();

        struct Plain;
        impl AsyncCloneVariant for Plain {}

        let out = lp
            .run_until_complete(async move { abstract_clone_async(&mut Plain, &av).await })
            .unwrap();
        assert!(out.ptr_eq(&AbstractValue::scalar(5i64, Type::I64).unwrap()));
    }
}
