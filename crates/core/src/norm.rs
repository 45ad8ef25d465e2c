//! AST normalization: erases docstrings, type annotations on assignments and
//! arguments, and pads blocks that the erasure emptied.
//!
//! Return-type annotations are deliberately left in place so that normalized
//! hashes stay stable across the whole corpus. Normalization is idempotent
//! after serialization: `normalize(parse(unparse(normalize(m))))` changes
//! nothing.

use crate::python::{FunctionDef, Module, Parameters, Stmt};

/// Normalize a module in place.
pub fn normalize(module: &mut Module) {
    let had_statements = !module.body.is_empty();
    normalize_body(&mut module.body);
    // A module that consisted solely of docstrings keeps a `pass` marker so
    // it still serializes to a parseable program. A module that was empty to
    // begin with stays empty and produces no record downstream.
    if had_statements && module.body.is_empty() {
        module.body.push(Stmt::Pass);
    }
}

/// Normalize a statement list in place: drop docstring statements, rewrite
/// annotated assignments, and recurse into nested blocks.
fn normalize_body(body: &mut Vec<Stmt>) {
    let mut out = Vec::with_capacity(body.len());
    for mut stmt in body.drain(..) {
        match &mut stmt {
            // Bare string-literal expressions vanish wherever they appear.
            Stmt::Expr(e) if e.is_string_literal() => continue,
            Stmt::AnnAssign { target, value: Some(value), .. } => {
                out.push(Stmt::Assign {
                    targets: vec![target.clone()],
                    value: value.clone(),
                });
                continue;
            }
            // Without an initializer there is no equivalent plain statement;
            // dropping it would erase a binding.
            Stmt::AnnAssign { .. } => {}
            Stmt::FunctionDef(f) => normalize_function(f),
            Stmt::ClassDef(c) => {
                normalize_body(&mut c.body);
                pad_if_empty(&mut c.body);
            }
            Stmt::If { body, orelse, .. } => {
                normalize_body(body);
                pad_if_empty(body);
                normalize_body(orelse);
            }
            Stmt::Try(t) => {
                normalize_body(&mut t.body);
                pad_if_empty(&mut t.body);
                for handler in &mut t.handlers {
                    normalize_body(&mut handler.body);
                    pad_if_empty(&mut handler.body);
                }
                normalize_body(&mut t.orelse);
                // An emptied finally is legal and stays empty.
                normalize_body(&mut t.finalbody);
            }
            Stmt::For(f) => {
                normalize_body(&mut f.body);
                normalize_body(&mut f.orelse);
            }
            Stmt::While { body, orelse, .. } => {
                normalize_body(body);
                normalize_body(orelse);
            }
            Stmt::With(w) => normalize_body(&mut w.body),
            Stmt::Match { cases, .. } => {
                for case in cases {
                    normalize_body(&mut case.body);
                }
            }
            _ => {}
        }
        out.push(stmt);
    }
    *body = out;
}

fn normalize_function(f: &mut FunctionDef) {
    strip_annotations(&mut f.params);
    normalize_body(&mut f.body);
    pad_if_empty(&mut f.body);
}

fn pad_if_empty(body: &mut Vec<Stmt>) {
    if body.is_empty() {
        body.push(Stmt::Pass);
    }
}

/// Drop parameter annotations, keeping names, defaults, and kinds. Lambdas
/// share the parameter type but can never carry annotations.
fn strip_annotations(params: &mut Parameters) {
    for p in params
        .posonly
        .iter_mut()
        .chain(params.args.iter_mut())
        .chain(params.kwonly.iter_mut())
    {
        p.arg.annotation = None;
    }
    if let Some(vararg) = &mut params.vararg {
        vararg.annotation = None;
    }
    if let Some(kwarg) = &mut params.kwarg {
        kwarg.annotation = None;
    }
}

/// Convenience used by tests and the import pipeline: parse, normalize, and
/// serialize in one step.
pub fn normalize_source(source: &str) -> Result<String, crate::python::ParseError> {
    let mut module = crate::python::parse_module(source)?;
    normalize(&mut module);
    Ok(crate::python::unparse_module(&module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::{parse_module, unparse_module};

    fn norm(src: &str) -> String {
        normalize_source(src).expect("parse")
    }

    #[test]
    fn test_noop() {
        assert_eq!(norm("x=1"), "x = 1");
    }

    #[test]
    fn test_annassign() {
        assert_eq!(norm("x:int=1"), "x = 1");
    }

    #[test]
    fn test_annassign_no_value() {
        // no equivalent statement exists without the annotation
        assert_eq!(norm("x:int"), "x: int");
    }

    #[test]
    fn test_funcdef() {
        assert_eq!(norm("def f(x): pass"), "def f(x):\n    pass");
    }

    #[test]
    fn test_funcdef_arg_type() {
        assert_eq!(norm("def f(x: int): pass"), "def f(x):\n    pass");
    }

    #[test]
    fn test_funcdef_ret_type_is_kept() {
        assert_eq!(norm("def f(x) -> None: pass"), "def f(x) -> None:\n    pass");
    }

    #[test]
    fn test_funcdef_defaults_survive() {
        assert_eq!(norm("def f(x: int = 3, *, y: str = 'a'): pass"), "def f(x=3, *, y='a'):\n    pass");
    }

    #[test]
    fn test_string_expr_value_kept() {
        assert_eq!(norm("x = 'f'"), "x = 'f'");
    }

    #[test]
    fn test_int_stmt_kept() {
        assert_eq!(norm("1"), "1");
    }

    #[test]
    fn test_string_stmts_dropped() {
        assert_eq!(norm("'f'\n'g'\nx\n'z'"), "x");
    }

    #[test]
    fn test_docstring_only_function() {
        assert_eq!(norm("def x(): ''"), "def x():\n    pass");
    }

    #[test]
    fn test_docstring_only_module() {
        assert_eq!(norm("'''mod doc'''"), "pass");
    }

    #[test]
    fn test_empty_module_stays_empty() {
        assert_eq!(norm(""), "");
        assert_eq!(norm("  \n\n"), "");
    }

    #[test]
    fn test_docstring_only_class() {
        assert_eq!(norm("class C:\n    'doc'"), "class C:\n    pass");
    }

    #[test]
    fn test_except_body_padded() {
        assert_eq!(
            norm("try:\n    ''\nexcept:\n    ''"),
            "try:\n    pass\nexcept:\n    pass"
        );
    }

    #[test]
    fn test_conditional_docstring() {
        assert_eq!(
            norm("if sys.version_info[:2] < (3, 3):\n    '''doc'''\n    _print=print_"),
            "if sys.version_info[:2] < (3, 3):\n    _print = print_"
        );
    }

    #[test]
    fn test_emptied_finally_left_empty() {
        // The finally clause disappears entirely; the result is no longer a
        // parseable try statement, which downstream treats as a parse skip.
        assert_eq!(norm("try:\n    ''\nfinally:\n    ''"), "try:\n    pass");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "def f(x: int) -> int:\n    'doc'\n    return x",
            "class C:\n    '''doc'''\n    x: int = 1\n\n    def m(self):\n        pass",
            "'''doc'''",
            "import os\nif os.name == 'nt':\n    SEP = '\\\\'\nelse:\n    SEP = '/'",
        ];
        for src in samples {
            let once = norm(src);
            let mut module = parse_module(&once).expect("reparse");
            normalize(&mut module);
            assert_eq!(unparse_module(&module), once, "not idempotent for {src:?}");
        }
    }
}
