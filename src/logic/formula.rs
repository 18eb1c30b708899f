use std::fmt::Display;
use std::fmt::Formatter;

use itertools::Itertools;

use crate::basic_types::AVar;

/// Signature symbol of an n-ary [`Formula::Seq`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sig {
    And,
    Or,
    Eq,
    Neq,
    Leq,
    Lt,
    Gt,
    Add,
    Minimize,
    Maximize,
}

impl Display for Sig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Sig::And => "/\\",
            Sig::Or => "\\/",
            Sig::Eq => "=",
            Sig::Neq => "!=",
            Sig::Leq => "<=",
            Sig::Lt => "<",
            Sig::Gt => ">",
            Sig::Add => "+",
            Sig::Minimize => "minimize",
            Sig::Maximize => "maximize",
        };
        write!(f, "{symbol}")
    }
}

/// A logical formula over abstract variables.
///
/// Sequences tagged by a [`Sig`] cover arithmetic, comparison and
/// optimisation; extended sequences tagged by a string cover open-ended
/// predicates such as `search(...)`, whose first arguments are atoms
/// (zero-arity extended sequences).
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    Bool(bool),
    Int(i64),
    /// An already-resolved abstract variable.
    Var(AVar),
    /// A variable referred to by name, resolved through the
    /// [`Env`](crate::logic::Env).
    NamedVar(String),
    Seq(Sig, Vec<Formula>),
    ESeq(String, Vec<Formula>),
}

impl Formula {
    pub fn var(x: AVar) -> Formula {
        Formula::Var(x)
    }

    pub fn named(name: impl Into<String>) -> Formula {
        Formula::NamedVar(name.into())
    }

    /// A zero-arity extended sequence, e.g. the `input_order` atom.
    pub fn atom(symbol: impl Into<String>) -> Formula {
        Formula::ESeq(symbol.into(), Vec::new())
    }

    pub fn binary(lhs: Formula, sig: Sig, rhs: Formula) -> Formula {
        Formula::Seq(sig, vec![lhs, rhs])
    }

    pub fn conjunction(conjuncts: Vec<Formula>) -> Formula {
        Formula::Seq(Sig::And, conjuncts)
    }

    pub fn disjunction(disjuncts: Vec<Formula>) -> Formula {
        Formula::Seq(Sig::Or, disjuncts)
    }

    /// `search(var_order, val_order, vars...)`.
    pub fn search(
        var_order: impl Into<String>,
        val_order: impl Into<String>,
        vars: impl IntoIterator<Item = Formula>,
    ) -> Formula {
        let mut args = vec![Formula::atom(var_order), Formula::atom(val_order)];
        args.extend(vars);
        Formula::ESeq("search".to_owned(), args)
    }

    pub fn minimize(objective: Formula) -> Formula {
        Formula::Seq(Sig::Minimize, vec![objective])
    }

    pub fn maximize(objective: Formula) -> Formula {
        Formula::Seq(Sig::Maximize, vec![objective])
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Formula::Var(_) | Formula::NamedVar(_))
    }

    /// The number of variable occurrences in the formula.
    pub fn num_vars(&self) -> usize {
        match self {
            Formula::Bool(_) | Formula::Int(_) => 0,
            Formula::Var(_) | Formula::NamedVar(_) => 1,
            Formula::Seq(_, args) | Formula::ESeq(_, args) => {
                args.iter().map(Formula::num_vars).sum()
            }
        }
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Formula::Bool(b) => write!(f, "{b}"),
            Formula::Int(v) => write!(f, "{v}"),
            Formula::Var(x) => write!(f, "{x}"),
            Formula::NamedVar(name) => write!(f, "{name}"),
            Formula::Seq(sig @ (Sig::Minimize | Sig::Maximize), args) => {
                write!(f, "{sig}({})", args.iter().join(", "))
            }
            Formula::Seq(sig, args) => {
                write!(f, "({})", args.iter().join(&format!(" {sig} ")))
            }
            Formula::ESeq(symbol, args) if args.is_empty() => write!(f, "{symbol}"),
            Formula::ESeq(symbol, args) => {
                write!(f, "{symbol}({})", args.iter().join(", "))
            }
        }
    }
}
