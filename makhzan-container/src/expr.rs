//! Deferred-operation proxy over an [`Injected`](crate::injected::Injected) value.
//!
//! Rust has no `__getattr__`/operator-overloading magic to intercept on an
//! erased `dyn Any`, so this proxy takes the design note's advice literally:
//! every operation is an explicit combinator that records an [`ExprNode`]
//! plus a small projection closure supplied by the caller (the same
//! "closure captured at construction time" trick [`crate::injected`] uses
//! for bindings). `eval()` reifies the recorded tree into a single
//! `Evaled` node composed from one `MZipped` gather over the leaves and one
//! `Mapped` step that replays the tree against the resolved values.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::Result;
use crate::injected::{Injected, InjectedNode, Value};

type Project = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
type Project2 = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;
type Invoke = Arc<dyn Fn(&Value, &[Value]) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Recorded proxy operation. Leaf references are indices into the
/// [`Expr`]'s shared `leaves` table.
#[derive(Clone)]
pub enum ExprNode {
    Object(usize),
    Attr { target: Box<ExprNode>, name: String, project: Project },
    Item { target: Box<ExprNode>, key: String, project: Project },
    Call { target: Box<ExprNode>, label: String, args: Vec<ExprNode>, invoke: Invoke },
    BinOp { op: &'static str, left: Box<ExprNode>, right: Box<ExprNode>, apply: Project2 },
    UnaryOp { op: &'static str, target: Box<ExprNode>, apply: Project },
    Await(Box<ExprNode>),
}

impl fmt::Debug for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Object(i) => write!(f, "${i}"),
            ExprNode::Attr { target, name, .. } => write!(f, "{target:?}.{name}"),
            ExprNode::Item { target, key, .. } => write!(f, "{target:?}[{key}]"),
            ExprNode::Call { target, label, args, .. } => {
                write!(f, "{target:?}.{label}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a:?}")?;
                }
                write!(f, ")")
            }
            ExprNode::BinOp { op, left, right, .. } => write!(f, "({left:?} {op} {right:?})"),
            ExprNode::UnaryOp { op, target, .. } => write!(f, "{op}{target:?}"),
            ExprNode::Await(inner) => write!(f, "await {inner:?}"),
        }
    }
}

/// An [`ExprNode`] paired with the leaf [`Injected`] nodes it closes over.
#[derive(Clone)]
pub struct Expr {
    pub root: ExprNode,
    pub leaves: Vec<Arc<InjectedNode>>,
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.root)
    }
}

/// A deferred-operation handle over a (type-erased) `Injected` value.
///
/// `T` exists only so the final [`DelegatedVar::eval`] result carries a
/// type hint at its call site; every intermediate combinator works over
/// the erased [`Value`].
pub struct DelegatedVar<T> {
    expr: Expr,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DelegatedVar<T> {
    fn clone(&self) -> Self {
        DelegatedVar { expr: self.expr.clone(), _marker: PhantomData }
    }
}

impl<T: Send + Sync + 'static> DelegatedVar<T> {
    pub(crate) fn from_node(node: Arc<InjectedNode>) -> Self {
        DelegatedVar {
            expr: Expr { root: ExprNode::Object(0), leaves: vec![node] },
            _marker: PhantomData,
        }
    }

    /// Merges another proxy's leaves into `self`, returning the offset to
    /// add to any of `other`'s leaf indices so they still point at the
    /// right entry in the combined table.
    fn absorb(&mut self, other: Expr) -> usize {
        let offset = self.expr.leaves.len();
        self.expr.leaves.extend(other.leaves);
        offset
    }

    fn reindex(node: ExprNode, offset: usize) -> ExprNode {
        match node {
            ExprNode::Object(i) => ExprNode::Object(i + offset),
            ExprNode::Attr { target, name, project } => ExprNode::Attr {
                target: Box::new(Self::reindex(*target, offset)),
                name,
                project,
            },
            ExprNode::Item { target, key, project } => ExprNode::Item {
                target: Box::new(Self::reindex(*target, offset)),
                key,
                project,
            },
            ExprNode::Call { target, label, args, invoke } => ExprNode::Call {
                target: Box::new(Self::reindex(*target, offset)),
                label,
                args: args.into_iter().map(|a| Self::reindex(a, offset)).collect(),
                invoke,
            },
            ExprNode::BinOp { op, left, right, apply } => ExprNode::BinOp {
                op,
                left: Box::new(Self::reindex(*left, offset)),
                right: Box::new(Self::reindex(*right, offset)),
                apply,
            },
            ExprNode::UnaryOp { op, target, apply } => {
                ExprNode::UnaryOp { op, target: Box::new(Self::reindex(*target, offset)), apply }
            }
            ExprNode::Await(inner) => ExprNode::Await(Box::new(Self::reindex(*inner, offset))),
        }
    }

    /// Records attribute access; `project` extracts the attribute's value
    /// from the resolved target at eval time.
    pub fn attr(&self, name: impl Into<String>, project: impl Fn(&Value) -> Value + Send + Sync + 'static) -> DelegatedVar<Value> {
        DelegatedVar {
            expr: Expr {
                root: ExprNode::Attr { target: Box::new(self.expr.root.clone()), name: name.into(), project: Arc::new(project) },
                leaves: self.expr.leaves.clone(),
            },
            _marker: PhantomData,
        }
    }

    /// Records indexing by a fixed key; `project` extracts the item.
    pub fn item(&self, key: impl Into<String>, project: impl Fn(&Value) -> Value + Send + Sync + 'static) -> DelegatedVar<Value> {
        DelegatedVar {
            expr: Expr {
                root: ExprNode::Item { target: Box::new(self.expr.root.clone()), key: key.into(), project: Arc::new(project) },
                leaves: self.expr.leaves.clone(),
            },
            _marker: PhantomData,
        }
    }

    /// Records a call with proxy arguments; `invoke` performs the async call
    /// once the target and all arguments are resolved.
    pub fn call(
        &self,
        label: impl Into<String>,
        args: Vec<DelegatedVar<Value>>,
        invoke: impl Fn(&Value, &[Value]) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    ) -> DelegatedVar<Value> {
        let mut combined = self.clone();
        let mut arg_nodes = Vec::with_capacity(args.len());
        for arg in args {
            let offset = combined.absorb(arg.expr.clone());
            arg_nodes.push(Self::reindex(arg.expr.root, offset));
        }
        DelegatedVar {
            expr: Expr {
                root: ExprNode::Call {
                    target: Box::new(combined.expr.root.clone()),
                    label: label.into(),
                    args: arg_nodes,
                    invoke: Arc::new(invoke),
                },
                leaves: combined.expr.leaves,
            },
            _marker: PhantomData,
        }
    }

    /// Records a binary operation against another proxy.
    pub fn bin_op(
        &self,
        op: &'static str,
        rhs: DelegatedVar<Value>,
        apply: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> DelegatedVar<Value> {
        let mut combined = self.clone();
        let offset = combined.absorb(rhs.expr.clone());
        let right = Self::reindex(rhs.expr.root, offset);
        DelegatedVar {
            expr: Expr {
                root: ExprNode::BinOp {
                    op,
                    left: Box::new(combined.expr.root.clone()),
                    right: Box::new(right),
                    apply: Arc::new(apply),
                },
                leaves: combined.expr.leaves,
            },
            _marker: PhantomData,
        }
    }

    /// Records a unary operation.
    pub fn unary_op(&self, op: &'static str, apply: impl Fn(&Value) -> Value + Send + Sync + 'static) -> DelegatedVar<Value> {
        DelegatedVar {
            expr: Expr {
                root: ExprNode::UnaryOp { op, target: Box::new(self.expr.root.clone()), apply: Arc::new(apply) },
                leaves: self.expr.leaves.clone(),
            },
            _marker: PhantomData,
        }
    }

    /// Marks this proxy as awaited; resolution already awaits every node,
    /// so this exists purely to keep the AST shape faithful for diagnostics.
    pub fn awaited(&self) -> DelegatedVar<Value> {
        DelegatedVar {
            expr: Expr { root: ExprNode::Await(Box::new(self.expr.root.clone())), leaves: self.expr.leaves.clone() },
            _marker: PhantomData,
        }
    }

    /// Reifies the recorded operations into a single `Evaled` [`Injected`].
    pub fn eval(self) -> Injected<Value> {
        let Expr { root, leaves } = self.expr;
        let ast = Expr { root: root.clone(), leaves: leaves.clone() };
        let mzipped = Arc::new(InjectedNode::MZipped { srcs: leaves });
        let root = Arc::new(root);
        let map: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync> = {
            let root = root.clone();
            Arc::new(move |tuple: Value| {
                let root = root.clone();
                let values = tuple
                    .downcast_ref::<Vec<Value>>()
                    .expect("mzipped gather always yields Vec<Value>")
                    .clone();
                async move { eval_node(&root, values).await }.boxed()
            })
        };
        let mapped = Arc::new(InjectedNode::Mapped { src: mzipped, map });
        Injected::from_node(Arc::new(InjectedNode::Evaled { value: mapped, ast }))
    }
}

fn eval_node(node: &ExprNode, leaves: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
    match node.clone() {
        ExprNode::Object(i) => {
            let v = leaves[i].clone();
            async move { Ok(v) }.boxed()
        }
        ExprNode::Attr { target, project, .. } => {
            let fut = eval_node(&target, leaves);
            async move { Ok(project(&fut.await?)) }.boxed()
        }
        ExprNode::Item { target, project, .. } => {
            let fut = eval_node(&target, leaves);
            async move { Ok(project(&fut.await?)) }.boxed()
        }
        ExprNode::Call { target, args, invoke, .. } => {
            let leaves2 = leaves.clone();
            let target_fut = eval_node(&target, leaves);
            async move {
                let target_val = target_fut.await?;
                let mut arg_vals = Vec::with_capacity(args.len());
                for arg in &args {
                    arg_vals.push(eval_node(arg, leaves2.clone()).await?);
                }
                invoke(&target_val, &arg_vals).await
            }
            .boxed()
        }
        ExprNode::BinOp { left, right, apply, .. } => {
            let leaves2 = leaves.clone();
            let left_fut = eval_node(&left, leaves);
            async move {
                let l = left_fut.await?;
                let r = eval_node(&right, leaves2).await?;
                Ok(apply(&l, &r))
            }
            .boxed()
        }
        ExprNode::UnaryOp { target, apply, .. } => {
            let fut = eval_node(&target, leaves);
            async move { Ok(apply(&fut.await?)) }.boxed()
        }
        ExprNode::Await(inner) => eval_node(&inner, leaves),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injected::Injected;

    #[tokio::test]
    async fn proxy_attr_projects_value() {
        let base: Injected<i32> = Injected::pure(41);
        let proxied = base.proxy();
        let plus_one = proxied.attr("plus_one", |v: &Value| {
            let n = *v.downcast_ref::<i32>().unwrap();
            Arc::new(n + 1) as Value
        });
        let evaled = plus_one.eval();
        let resolved = evaled.resolve_standalone().await.unwrap();
        assert_eq!(*resolved.downcast_ref::<i32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn proxy_bin_op_combines_two_leaves() {
        let a = Injected::pure(2i32).proxy();
        let b = Injected::pure(3i32).proxy();
        let sum = a.bin_op("+", b, |l, r| {
            let l = *l.downcast_ref::<i32>().unwrap();
            let r = *r.downcast_ref::<i32>().unwrap();
            Arc::new(l + r) as Value
        });
        let resolved = sum.eval().resolve_standalone().await.unwrap();
        assert_eq!(*resolved.downcast_ref::<i32>().unwrap(), 5);
    }
}
