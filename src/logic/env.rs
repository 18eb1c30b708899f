use crate::basic_types::AType;
use crate::basic_types::AVar;
use crate::basic_types::DiagnosticCode;
use crate::basic_types::DiagnosticSink;
use crate::containers::HashMap;
use crate::logic::Formula;

/// The variable environment: resolves named variables to [`AVar`]s and hands
/// out fresh abstract-type identifiers to the domains of a composition.
#[derive(Debug, Clone, Default)]
pub struct Env {
    next_aty: u32,
    names: HashMap<String, AVar>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    /// Allocates a fresh abstract type for a new domain in the composition.
    pub fn extends_abstract_dom(&mut self) -> AType {
        let aty = AType::new(self.next_aty);
        self.next_aty += 1;
        aty
    }

    /// Binds `name` to `var`. Later bindings of the same name shadow earlier
    /// ones.
    pub fn declare(&mut self, name: impl Into<String>, var: AVar) -> AVar {
        let _ = self.names.insert(name.into(), var);
        var
    }

    pub fn lookup(&self, name: &str) -> Option<AVar> {
        self.names.get(name).copied()
    }

    /// Resolves a variable formula to an [`AVar`].
    ///
    /// Reports [`DiagnosticCode::UndeclaredVariable`] for unknown names and
    /// [`DiagnosticCode::UnsupportedFormula`] for non-variable formulas.
    pub fn interpret(&self, formula: &Formula, sink: &mut DiagnosticSink) -> Option<AVar> {
        match formula {
            Formula::Var(x) => Some(*x),
            Formula::NamedVar(name) => {
                let resolved = self.lookup(name);
                if resolved.is_none() {
                    sink.report(
                        DiagnosticCode::UndeclaredVariable,
                        formula,
                        format!("the variable `{name}` is not declared in the environment"),
                    );
                }
                resolved
            }
            _ => {
                sink.report(
                    DiagnosticCode::UnsupportedFormula,
                    formula,
                    "expected a variable",
                );
                None
            }
        }
    }
}
