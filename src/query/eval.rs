//! Query execution.
//!
//! Evaluates a compiled [`Query`] step by step: each step maps the
//! current node set to the matching children (or, for a scoped query's
//! first step, filters the start node itself), then runs the step's
//! predicates with `position()` and `last()` scoped to the sibling group
//! that survived the name filter. Results come out in document order:
//! node offsets increase in document order, and same-depth sibling
//! groups never overlap.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;

use super::parser::{CmpOp, Expr, Func, NameTest, Query};
use crate::error::{Error, Result};
use crate::silo::{Node, SiloCore};

/// Run `query` against a silo.
///
/// `start` switches to scoped evaluation: the first step's candidate set
/// is the start node itself rather than the root's children. `limit`
/// bounds the result count (0 = unlimited); evaluation stops as soon as
/// the final step has produced `limit` nodes.
pub(crate) fn execute(
    core: &Arc<SiloCore>,
    start: Option<u32>,
    query: &Query,
    limit: usize,
) -> Result<Vec<Node>> {
    let scoped = start.is_some();
    let mut current: Vec<u32> = match start {
        Some(off) => vec![off],
        None => match core.root_off() {
            Some(root) => vec![root],
            None => return Ok(Vec::new()),
        },
    };

    for (index, step) in query.steps.iter().enumerate() {
        let last_step = index + 1 == query.steps.len();
        let mut selected = Vec::new();

        'sets: for &parent in &current {
            let group: Vec<u32> = if scoped && index == 0 {
                if step.name.matches(core.element_name(parent)?) {
                    vec![parent]
                } else {
                    Vec::new()
                }
            } else {
                children_matching(core, parent, &step.name)?
            };

            let last = group.len();
            for (i, &candidate) in group.iter().enumerate() {
                let ctx = Ctx {
                    core,
                    node: candidate,
                    position: i + 1,
                    last,
                };
                if eval_predicates(&step.predicates, &ctx)? {
                    selected.push(candidate);
                    if last_step && limit > 0 && selected.len() == limit {
                        break 'sets;
                    }
                }
            }
        }

        if selected.is_empty() {
            return Ok(Vec::new());
        }
        current = selected;
    }

    current.dedup();
    Ok(current
        .into_iter()
        .map(|off| Node::new(Arc::clone(core), off))
        .collect())
}

/// Children of `parent` passing the name filter, in document order.
fn children_matching(core: &SiloCore, parent: u32, test: &NameTest) -> Result<Vec<u32>> {
    let mut group = Vec::new();
    let mut child = core.child_off(parent)?;
    while let Some(off) = child {
        if test.matches(core.element_name(off)?) {
            group.push(off);
        }
        child = core.next_off(off)?;
    }
    Ok(group)
}

/// Per-candidate evaluation context.
struct Ctx<'a> {
    core: &'a SiloCore,
    node: u32,
    /// 1-based index within the name-filtered sibling group.
    position: usize,
    /// Size of that group.
    last: usize,
}

fn eval_predicates(predicates: &SmallVec<[Expr; 2]>, ctx: &Ctx) -> Result<bool> {
    for predicate in predicates {
        if !to_bool(&eval_expr(predicate, ctx)?) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug, Clone, PartialEq)]
enum Value<'a> {
    None,
    Int(i64),
    Str(Cow<'a, str>),
    Bool(bool),
}

fn eval_expr<'a>(expr: &'a Expr, ctx: &Ctx<'a>) -> Result<Value<'a>> {
    match expr {
        Expr::Int(value) => Ok(Value::Int(*value)),
        Expr::Str(value) => Ok(Value::Str(Cow::Borrowed(value))),

        Expr::Attr(name) => Ok(match ctx.core.attr_of(ctx.node, name)? {
            Some(value) => Value::Str(Cow::Borrowed(value)),
            None => Value::None,
        }),

        // text of the first child element with the given name
        Expr::Child(name) => {
            let mut child = ctx.core.child_off(ctx.node)?;
            while let Some(off) = child {
                if ctx.core.element_name(off)? == name {
                    let text = ctx.core.text_of(off)?.unwrap_or("");
                    return Ok(Value::Str(Cow::Borrowed(text)));
                }
                child = ctx.core.next_off(off)?;
            }
            Ok(Value::None)
        }

        Expr::Call(func, args) => eval_call(*func, args, ctx),

        Expr::Cmp(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, ctx)?;
            let rhs = eval_expr(rhs, ctx)?;
            compare(*op, &lhs, &rhs).map(Value::Bool)
        }

        Expr::And(lhs, rhs) => {
            let result = to_bool(&eval_expr(lhs, ctx)?) && to_bool(&eval_expr(rhs, ctx)?);
            Ok(Value::Bool(result))
        }

        Expr::Or(lhs, rhs) => {
            let result = to_bool(&eval_expr(lhs, ctx)?) || to_bool(&eval_expr(rhs, ctx)?);
            Ok(Value::Bool(result))
        }
    }
}

fn eval_call<'a>(func: Func, args: &'a [Expr], ctx: &Ctx<'a>) -> Result<Value<'a>> {
    match func {
        Func::Text => Ok(match ctx.core.text_of(ctx.node)? {
            Some(text) => Value::Str(Cow::Borrowed(text)),
            None => Value::None,
        }),
        Func::First => Ok(Value::Bool(ctx.position == 1)),
        Func::Last => Ok(Value::Bool(ctx.position == ctx.last)),
        Func::Position => Ok(Value::Int(ctx.position as i64)),

        Func::Contains => {
            let haystack = eval_expr(&args[0], ctx)?;
            let needle = eval_expr(&args[1], ctx)?;
            Ok(match (as_string(&haystack), as_string(&needle)) {
                (Some(h), Some(n)) => Value::Bool(h.contains(n.as_ref())),
                _ => Value::None,
            })
        }

        Func::StartsWith => {
            let value = eval_expr(&args[0], ctx)?;
            let prefix = eval_expr(&args[1], ctx)?;
            Ok(match (as_string(&value), as_string(&prefix)) {
                (Some(v), Some(p)) => Value::Bool(v.starts_with(p.as_ref())),
                _ => Value::None,
            })
        }

        Func::StringLength => {
            let value = eval_expr(&args[0], ctx)?;
            let len = as_string(&value)
                .map(|s| s.chars().count() as i64)
                .unwrap_or(0);
            Ok(Value::Int(len))
        }

        Func::Number => {
            let value = eval_expr(&args[0], ctx)?;
            Ok(match as_int(&value)? {
                Some(n) => Value::Int(n),
                None => Value::None,
            })
        }
    }
}

/// Boolean coercion: nonzero integer and non-empty string are true,
/// none is false.
fn to_bool(value: &Value) -> bool {
    match value {
        Value::None => false,
        Value::Int(n) => *n != 0,
        Value::Str(s) => !s.is_empty(),
        Value::Bool(b) => *b,
    }
}

fn as_string<'a>(value: &'a Value<'a>) -> Option<Cow<'a, str>> {
    match value {
        Value::None => None,
        Value::Int(n) => Some(Cow::Owned(n.to_string())),
        Value::Str(s) => Some(Cow::Borrowed(s.as_ref())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
    }
}

fn as_int(value: &Value) -> Result<Option<i64>> {
    match value {
        Value::None => Ok(None),
        Value::Int(n) => Ok(Some(*n)),
        Value::Str(s) => parse_int(s).map(Some),
        Value::Bool(b) => Ok(Some(*b as i64)),
    }
}

fn parse_int(s: &str) -> Result<i64> {
    s.trim()
        .parse()
        .map_err(|_| Error::invalid_argument(format!("cannot convert '{s}' to a number")))
}

/// Comparisons against none are false, except `!=` against a non-none.
/// Integer/string pairs coerce the string; anything else mixed is a
/// type mismatch.
fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool> {
    match (lhs, rhs) {
        (Value::None, Value::None) => Ok(false),
        (Value::None, _) | (_, Value::None) => Ok(op == CmpOp::Ne),

        (Value::Int(a), Value::Int(b)) => Ok(ordering_matches(op, a.cmp(b))),
        (Value::Str(a), Value::Str(b)) => Ok(ordering_matches(op, a.as_ref().cmp(b.as_ref()))),

        (Value::Int(a), Value::Str(s)) => Ok(ordering_matches(op, a.cmp(&parse_int(s)?))),
        (Value::Str(s), Value::Int(b)) => Ok(ordering_matches(op, parse_int(s)?.cmp(b))),

        (Value::Bool(a), Value::Bool(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => {
            Ok((a == b) == (op == CmpOp::Eq))
        }

        (lhs, rhs) => Err(Error::invalid_argument(format!(
            "type mismatch: cannot compare {} with {}",
            kind_name(lhs),
            kind_name(rhs)
        ))),
    }
}

fn ordering_matches(op: CmpOp, ordering: Ordering) -> bool {
    match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::None => "none",
        Value::Int(_) => "integer",
        Value::Str(_) => "string",
        Value::Bool(_) => "boolean",
    }
}
