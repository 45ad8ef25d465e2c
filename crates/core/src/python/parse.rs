//! tree-sitter front end: lowers the Python CST into the typed AST.
//!
//! The lowering is an explicit match over node kinds, field-name navigation
//! throughout. Anything outside the supported grammar (py2-only statements,
//! 3.12 type aliases, malformed literals, ERROR nodes) is a [`ParseError`];
//! ingestion treats that as a per-file skip.

use thiserror::Error;
use tree_sitter::{Node, Parser};

use super::{
    Alias, Arg, BoolOpKind, ClassDef, Comprehension, Expr, ExceptHandler, FStringPart,
    FunctionDef, For, Keyword, MatchCase, Module, Param, Parameters, Stmt, Try, With, WithItem,
};

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

type Result<T> = std::result::Result<T, ParseError>;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse a whole module, rejecting trees that contain syntax errors.
pub fn parse_module(source: &str) -> Result<Module> {
    let tree = parse_tree(source)?;
    let lw = Lowerer { src: source };
    lw.module(tree.root_node())
}

/// Find every function covered-range in `source`, in source order.
///
/// A covered range is a sync `def` not nested inside another sync `def`
/// (class methods count; async defs and their decorators are descended into
/// instead). Ranges are `(start_row, end_row_exclusive)`, zero-based, with
/// the start at the first decorator when present, paired with the lowered
/// function statement.
pub fn find_function_ranges(source: &str) -> Result<Vec<(usize, usize, Stmt)>> {
    let tree = parse_tree(source)?;
    let lw = Lowerer { src: source };
    let mut out = Vec::new();
    collect_functions(tree.root_node(), &lw, &mut out)?;
    out.sort_by_key(|(start, end, _)| (*start, *end));
    Ok(out)
}

fn parse_tree(source: &str) -> Result<tree_sitter::Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ParseError(format!("language version mismatch: {e}")))?;
    let tree = parser.parse(source, None).ok_or_else(|| ParseError("parser timeout".into()))?;
    if tree.root_node().has_error() {
        return Err(ParseError("syntax error".into()));
    }
    Ok(tree)
}

fn is_async(node: Node) -> bool {
    let mut cursor = node.walk();
    let result = node.children(&mut cursor).any(|c| c.kind() == "async");
    result
}

fn collect_functions(
    node: Node,
    lw: &Lowerer,
    out: &mut Vec<(usize, usize, Stmt)>,
) -> Result<()> {
    match node.kind() {
        "function_definition" if !is_async(node) => {
            let start = node.start_position().row;
            let end = node.end_position().row + 1;
            out.push((start, end, lw.stmt(node)?));
        }
        "decorated_definition" => {
            let def = node
                .child_by_field_name("definition")
                .ok_or_else(|| lw.err(node, "decorated definition without definition"))?;
            if def.kind() == "function_definition" && !is_async(def) {
                let start = node.start_position().row;
                let end = def.end_position().row + 1;
                out.push((start, end, lw.stmt(node)?));
            } else {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    collect_functions(child, lw, out)?;
                }
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_functions(child, lw, out)?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lowerer
// ---------------------------------------------------------------------------

struct Lowerer<'a> {
    src: &'a str,
}

impl<'a> Lowerer<'a> {
    fn text(&self, node: Node) -> &'a str {
        &self.src[node.byte_range()]
    }

    fn err(&self, node: Node, msg: &str) -> ParseError {
        ParseError(format!("{msg} at line {}", node.start_position().row + 1))
    }

    fn unsupported(&self, node: Node) -> ParseError {
        self.err(node, &format!("unsupported syntax `{}`", node.kind()))
    }

    /// Named children minus interspersed comments.
    fn named<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        let mut cursor = node.walk();
        node.named_children(&mut cursor).filter(|c| c.kind() != "comment").collect()
    }

    fn module(&self, root: Node) -> Result<Module> {
        let mut body = Vec::new();
        for child in self.named(root) {
            body.push(self.stmt(child)?);
        }
        Ok(Module { body })
    }

    /// Lower a `block` (or aliased simple-statement suite) into a body.
    fn suite(&self, node: Node) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        for child in self.named(node) {
            body.push(self.stmt(child)?);
        }
        Ok(body)
    }

    fn field<'t>(&self, node: Node<'t>, name: &str) -> Result<Node<'t>> {
        node.child_by_field_name(name)
            .ok_or_else(|| self.err(node, &format!("missing `{name}` in `{}`", node.kind())))
    }

    fn fields<'t>(&self, node: Node<'t>, name: &str) -> Vec<Node<'t>> {
        let mut cursor = node.walk();
        node.children_by_field_name(name, &mut cursor).filter(|c| c.kind() != "comment").collect()
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn stmt(&self, node: Node) -> Result<Stmt> {
        match node.kind() {
            "expression_statement" => self.expression_statement(node),
            "function_definition" => Ok(Stmt::FunctionDef(self.function_def(node, Vec::new())?)),
            "class_definition" => Ok(Stmt::ClassDef(self.class_def(node, Vec::new())?)),
            "decorated_definition" => self.decorated_definition(node),
            "if_statement" => self.if_statement(node),
            "for_statement" => self.for_statement(node),
            "while_statement" => self.while_statement(node),
            "try_statement" => self.try_statement(node),
            "with_statement" => self.with_statement(node),
            "match_statement" => self.match_statement(node),
            "return_statement" => {
                let kids = self.named(node);
                let value = match kids.len() {
                    0 => None,
                    1 => Some(self.expr(kids[0])?),
                    _ => Some(Expr::Tuple(
                        kids.iter().map(|&k| self.expr(k)).collect::<Result<_>>()?,
                    )),
                };
                Ok(Stmt::Return(value))
            }
            "delete_statement" => {
                let kids = self.named(node);
                let mut targets = Vec::new();
                for kid in kids {
                    if kid.kind() == "expression_list" {
                        for e in self.named(kid) {
                            targets.push(self.expr(e)?);
                        }
                    } else {
                        targets.push(self.expr(kid)?);
                    }
                }
                Ok(Stmt::Delete(targets))
            }
            "raise_statement" => {
                let cause = match node.child_by_field_name("cause") {
                    Some(c) => Some(self.expr(c)?),
                    None => None,
                };
                let exc = self
                    .named(node)
                    .into_iter()
                    .find(|k| Some(k.id()) != node.child_by_field_name("cause").map(|c| c.id()));
                let exc = match exc {
                    Some(e) if e.kind() == "expression_list" => {
                        return Err(self.unsupported(e));
                    }
                    Some(e) => Some(self.expr(e)?),
                    None => None,
                };
                Ok(Stmt::Raise { exc, cause })
            }
            "assert_statement" => {
                let kids = self.named(node);
                if kids.is_empty() {
                    return Err(self.err(node, "assert without condition"));
                }
                let test = self.expr(kids[0])?;
                let msg = match kids.get(1) {
                    Some(&m) => Some(self.expr(m)?),
                    None => None,
                };
                Ok(Stmt::Assert { test, msg })
            }
            "import_statement" => Ok(Stmt::Import(self.import_list(node)?)),
            "import_from_statement" => self.import_from(node),
            "future_import_statement" => Ok(Stmt::ImportFrom {
                module: Some("__future__".to_string()),
                names: self.import_list(node)?,
                level: 0,
            }),
            "global_statement" => {
                Ok(Stmt::Global(self.named(node).iter().map(|n| self.text(*n).to_string()).collect()))
            }
            "nonlocal_statement" => Ok(Stmt::Nonlocal(
                self.named(node).iter().map(|n| self.text(*n).to_string()).collect(),
            )),
            "pass_statement" => Ok(Stmt::Pass),
            "break_statement" => Ok(Stmt::Break),
            "continue_statement" => Ok(Stmt::Continue),
            _ => Err(self.unsupported(node)),
        }
    }

    fn expression_statement(&self, node: Node) -> Result<Stmt> {
        let kids = self.named(node);
        match kids.as_slice() {
            [] => Err(self.err(node, "empty expression statement")),
            [kid] => match kid.kind() {
                "assignment" => self.assignment(*kid),
                "augmented_assignment" => {
                    let target = self.expr(self.field(*kid, "left")?)?;
                    let op_node = self.field(*kid, "operator")?;
                    let op = self.text(op_node).trim_end_matches('=').to_string();
                    let value = self.expr(self.field(*kid, "right")?)?;
                    Ok(Stmt::AugAssign { target, op, value })
                }
                _ => {
                    // a trailing comma makes `x,` a one-element tuple
                    let mut cursor = node.walk();
                    let trailing_comma = node.children(&mut cursor).any(|c| c.kind() == ",");
                    let value = self.expr(*kid)?;
                    if trailing_comma {
                        Ok(Stmt::Expr(Expr::Tuple(vec![value])))
                    } else {
                        Ok(Stmt::Expr(value))
                    }
                }
            },
            many => Ok(Stmt::Expr(Expr::Tuple(
                many.iter().map(|&k| self.expr(k)).collect::<Result<_>>()?,
            ))),
        }
    }

    fn assignment(&self, node: Node) -> Result<Stmt> {
        let left = self.field(node, "left")?;
        if let Some(annotation) = node.child_by_field_name("type") {
            let value = match node.child_by_field_name("right") {
                Some(r) => Some(self.rhs(r)?),
                None => None,
            };
            return Ok(Stmt::AnnAssign {
                target: self.expr(left)?,
                annotation: self.type_expr(annotation)?,
                value,
            });
        }

        let mut targets = vec![self.expr(left)?];
        let mut right = self.field(node, "right")?;
        while right.kind() == "assignment" {
            if right.child_by_field_name("type").is_some() {
                return Err(self.unsupported(right));
            }
            targets.push(self.expr(self.field(right, "left")?)?);
            right = self.field(right, "right")?;
        }
        Ok(Stmt::Assign { targets, value: self.rhs(right)? })
    }

    /// Right-hand sides admit bare yields and expression lists.
    fn rhs(&self, node: Node) -> Result<Expr> {
        self.expr(node)
    }

    fn decorated_definition(&self, node: Node) -> Result<Stmt> {
        let mut decorators = Vec::new();
        for child in self.named(node) {
            if child.kind() == "decorator" {
                let inner = self
                    .named(child)
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.err(child, "empty decorator"))?;
                decorators.push(self.expr(inner)?);
            }
        }
        let def = self.field(node, "definition")?;
        match def.kind() {
            "function_definition" => Ok(Stmt::FunctionDef(self.function_def(def, decorators)?)),
            "class_definition" => Ok(Stmt::ClassDef(self.class_def(def, decorators)?)),
            _ => Err(self.unsupported(def)),
        }
    }

    fn function_def(&self, node: Node, decorators: Vec<Expr>) -> Result<FunctionDef> {
        let name = self.text(self.field(node, "name")?).to_string();
        let params = self.parameters(self.field(node, "parameters")?)?;
        let returns = match node.child_by_field_name("return_type") {
            Some(r) => Some(self.type_expr(r)?),
            None => None,
        };
        let body = self.suite(self.field(node, "body")?)?;
        Ok(FunctionDef { is_async: is_async(node), name, params, returns, body, decorators })
    }

    fn class_def(&self, node: Node, decorators: Vec<Expr>) -> Result<ClassDef> {
        let name = self.text(self.field(node, "name")?).to_string();
        let mut bases = Vec::new();
        let mut keywords = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            for arg in self.named(superclasses) {
                match arg.kind() {
                    "keyword_argument" => {
                        let kw_name = self.text(self.field(arg, "name")?).to_string();
                        let value = self.expr(self.field(arg, "value")?)?;
                        keywords.push(Keyword { arg: Some(kw_name), value });
                    }
                    "dictionary_splat" => {
                        let inner = self.splat_value(arg)?;
                        keywords.push(Keyword { arg: None, value: inner });
                    }
                    "list_splat" => bases.push(Expr::Starred(Box::new(self.splat_value(arg)?))),
                    _ => bases.push(self.expr(arg)?),
                }
            }
        }
        let body = self.suite(self.field(node, "body")?)?;
        Ok(ClassDef { name, bases, keywords, body, decorators })
    }

    fn if_statement(&self, node: Node) -> Result<Stmt> {
        let test = self.expr(self.field(node, "condition")?)?;
        let body = self.suite(self.field(node, "consequence")?)?;
        let mut orelse = Vec::new();
        // elif chains nest right; build from the last clause back.
        let alternatives = self.fields(node, "alternative");
        for alt in alternatives.into_iter().rev() {
            match alt.kind() {
                "else_clause" => {
                    orelse = self.suite(self.field(alt, "body")?)?;
                }
                "elif_clause" => {
                    let elif_test = self.expr(self.field(alt, "condition")?)?;
                    let elif_body = self.suite(self.field(alt, "consequence")?)?;
                    orelse = vec![Stmt::If { test: elif_test, body: elif_body, orelse }];
                }
                _ => return Err(self.unsupported(alt)),
            }
        }
        Ok(Stmt::If { test, body, orelse })
    }

    fn for_statement(&self, node: Node) -> Result<Stmt> {
        let target = self.expr(self.field(node, "left")?)?;
        let iter = self.expr(self.field(node, "right")?)?;
        let body = self.suite(self.field(node, "body")?)?;
        let orelse = match node.child_by_field_name("alternative") {
            Some(alt) => self.suite(self.field(alt, "body")?)?,
            None => Vec::new(),
        };
        Ok(Stmt::For(For { is_async: is_async(node), target, iter, body, orelse }))
    }

    fn while_statement(&self, node: Node) -> Result<Stmt> {
        let test = self.expr(self.field(node, "condition")?)?;
        let body = self.suite(self.field(node, "body")?)?;
        let orelse = match node.child_by_field_name("alternative") {
            Some(alt) => self.suite(self.field(alt, "body")?)?,
            None => Vec::new(),
        };
        Ok(Stmt::While { test, body, orelse })
    }

    fn try_statement(&self, node: Node) -> Result<Stmt> {
        let body = self.suite(self.field(node, "body")?)?;
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();
        let mut is_star = false;
        for child in self.named(node) {
            match child.kind() {
                "except_clause" => handlers.push(self.except_clause(child)?),
                "except_group_clause" => {
                    is_star = true;
                    handlers.push(self.except_clause(child)?);
                }
                "else_clause" => orelse = self.suite(self.field(child, "body")?)?,
                "finally_clause" => {
                    let block = self
                        .named(child)
                        .into_iter()
                        .find(|c| c.kind() == "block")
                        .ok_or_else(|| self.err(child, "finally without block"))?;
                    finalbody = self.suite(block)?;
                }
                "block" => {} // the try body, already lowered via the field
                _ => return Err(self.unsupported(child)),
            }
        }
        Ok(Stmt::Try(Try { body, handlers, orelse, finalbody, is_star }))
    }

    fn except_clause(&self, node: Node) -> Result<ExceptHandler> {
        let kids = self.named(node);
        let block = kids
            .iter()
            .copied()
            .find(|c| c.kind() == "block")
            .ok_or_else(|| self.err(node, "except without block"))?;
        let body = self.suite(block)?;
        let exprs: Vec<Node> = kids.into_iter().filter(|c| c.kind() != "block").collect();
        let (typ, name) = match exprs.as_slice() {
            [] => (None, None),
            [single] if single.kind() == "as_pattern" => {
                let (value, alias) = self.as_pattern(*single)?;
                let name = match alias {
                    Expr::Name(n) => Some(n),
                    _ => return Err(self.err(*single, "exception alias must be a name")),
                };
                (Some(value), name)
            }
            [single] => (Some(self.expr(*single)?), None),
            [value, alias] => {
                // `except E as e` with the alias as a sibling expression; the
                // legacy comma form is py2-only and rejected by has_error.
                let name = match self.expr(*alias)? {
                    Expr::Name(n) => Some(n),
                    _ => return Err(self.err(*alias, "exception alias must be a name")),
                };
                (Some(self.expr(*value)?), name)
            }
            _ => return Err(self.unsupported(node)),
        };
        Ok(ExceptHandler { typ, name, body })
    }

    fn with_statement(&self, node: Node) -> Result<Stmt> {
        let mut items = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() != "with_clause" {
                continue;
            }
            for item in self.named(child) {
                if item.kind() != "with_item" {
                    continue;
                }
                let value = self.field(item, "value")?;
                if value.kind() == "as_pattern" {
                    let (context, vars) = self.as_pattern(value)?;
                    items.push(WithItem { context, vars: Some(vars) });
                } else {
                    items.push(WithItem { context: self.expr(value)?, vars: None });
                }
            }
        }
        let body = self.suite(self.field(node, "body")?)?;
        Ok(Stmt::With(With { is_async: is_async(node), items, body }))
    }

    /// `expr as target` — returns (expr, target).
    fn as_pattern(&self, node: Node) -> Result<(Expr, Expr)> {
        let kids = self.named(node);
        let value = kids.first().ok_or_else(|| self.err(node, "empty as-pattern"))?;
        let alias = self.field(node, "alias")?;
        let target = self.as_pattern_target(alias)?;
        Ok((self.expr(*value)?, target))
    }

    fn as_pattern_target(&self, node: Node) -> Result<Expr> {
        // The alias is an expression re-tagged by the grammar; plain names are
        // the only shape the normalizer and unparser ever need.
        let named = self.named(node);
        match named.as_slice() {
            [] => Ok(Expr::Name(self.text(node).to_string())),
            [identifier] if identifier.kind() == "identifier" => {
                Ok(Expr::Name(self.text(*identifier).to_string()))
            }
            _ => Err(self.unsupported(node)),
        }
    }

    fn match_statement(&self, node: Node) -> Result<Stmt> {
        let subjects = self.fields(node, "subject");
        let subject = match subjects.as_slice() {
            [] => return Err(self.err(node, "match without subject")),
            [one] => self.expr(*one)?,
            many => {
                Expr::Tuple(many.iter().map(|&s| self.expr(s)).collect::<Result<_>>()?)
            }
        };
        let body = self.field(node, "body")?;
        let mut cases = Vec::new();
        for clause in self.named(body) {
            if clause.kind() != "case_clause" {
                continue;
            }
            let patterns: Vec<Node> =
                self.named(clause).into_iter().filter(|c| c.kind() == "case_pattern").collect();
            let (first, last) = match (patterns.first(), patterns.last()) {
                (Some(f), Some(l)) => (*f, *l),
                _ => return Err(self.err(clause, "case without pattern")),
            };
            let pattern = self.src[first.start_byte()..last.end_byte()].to_string();
            let guard = match clause.child_by_field_name("guard") {
                Some(g) => {
                    let inner = self
                        .named(g)
                        .into_iter()
                        .next()
                        .ok_or_else(|| self.err(g, "empty guard"))?;
                    Some(self.expr(inner)?)
                }
                None => None,
            };
            let case_body = self.suite(self.field(clause, "consequence")?)?;
            cases.push(MatchCase { pattern, guard, body: case_body });
        }
        Ok(Stmt::Match { subject, cases })
    }

    fn import_list(&self, node: Node) -> Result<Vec<Alias>> {
        let mut names = Vec::new();
        for child in self.fields(node, "name") {
            match child.kind() {
                "dotted_name" => {
                    names.push(Alias { name: self.text(child).to_string(), asname: None })
                }
                "aliased_import" => {
                    let name = self.text(self.field(child, "name")?).to_string();
                    let asname = Some(self.text(self.field(child, "alias")?).to_string());
                    names.push(Alias { name, asname });
                }
                _ => return Err(self.unsupported(child)),
            }
        }
        Ok(names)
    }

    fn import_from(&self, node: Node) -> Result<Stmt> {
        let module_name = self.field(node, "module_name")?;
        let (module, level) = match module_name.kind() {
            "dotted_name" => (Some(self.text(module_name).to_string()), 0),
            "relative_import" => {
                let kids = self.named(module_name);
                let mut level = 0u32;
                let mut module = None;
                for kid in kids {
                    match kid.kind() {
                        "import_prefix" => level = self.text(kid).len() as u32,
                        "dotted_name" => module = Some(self.text(kid).to_string()),
                        _ => return Err(self.unsupported(kid)),
                    }
                }
                (module, level)
            }
            _ => return Err(self.unsupported(module_name)),
        };

        let mut cursor = node.walk();
        let wildcard = node.children(&mut cursor).any(|c| c.kind() == "wildcard_import");
        let names = if wildcard {
            vec![Alias { name: "*".to_string(), asname: None }]
        } else {
            self.import_list(node)?
        };
        Ok(Stmt::ImportFrom { module, names, level })
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    fn parameters(&self, node: Node) -> Result<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        for child in self.named(node) {
            match child.kind() {
                "identifier" => {
                    let p = Param {
                        arg: Arg { name: self.text(child).to_string(), annotation: None },
                        default: None,
                    };
                    if seen_star {
                        params.kwonly.push(p);
                    } else {
                        params.args.push(p);
                    }
                }
                "typed_parameter" => {
                    let annotation = self.type_expr(self.field(child, "type")?)?;
                    let inner = self
                        .named(child)
                        .into_iter()
                        .next()
                        .ok_or_else(|| self.err(child, "typed parameter without name"))?;
                    match inner.kind() {
                        "identifier" => {
                            let p = Param {
                                arg: Arg {
                                    name: self.text(inner).to_string(),
                                    annotation: Some(Box::new(annotation)),
                                },
                                default: None,
                            };
                            if seen_star {
                                params.kwonly.push(p);
                            } else {
                                params.args.push(p);
                            }
                        }
                        "list_splat_pattern" => {
                            seen_star = true;
                            params.vararg = Some(Arg {
                                name: self.splat_name(inner)?,
                                annotation: Some(Box::new(annotation)),
                            });
                        }
                        "dictionary_splat_pattern" => {
                            params.kwarg = Some(Arg {
                                name: self.splat_name(inner)?,
                                annotation: Some(Box::new(annotation)),
                            });
                        }
                        _ => return Err(self.unsupported(inner)),
                    }
                }
                "default_parameter" => {
                    let name_node = self.field(child, "name")?;
                    if name_node.kind() != "identifier" {
                        return Err(self.unsupported(name_node));
                    }
                    let p = Param {
                        arg: Arg { name: self.text(name_node).to_string(), annotation: None },
                        default: Some(self.expr(self.field(child, "value")?)?),
                    };
                    if seen_star {
                        params.kwonly.push(p);
                    } else {
                        params.args.push(p);
                    }
                }
                "typed_default_parameter" => {
                    let name_node = self.field(child, "name")?;
                    let p = Param {
                        arg: Arg {
                            name: self.text(name_node).to_string(),
                            annotation: Some(Box::new(self.type_expr(self.field(child, "type")?)?)),
                        },
                        default: Some(self.expr(self.field(child, "value")?)?),
                    };
                    if seen_star {
                        params.kwonly.push(p);
                    } else {
                        params.args.push(p);
                    }
                }
                "list_splat_pattern" => {
                    seen_star = true;
                    params.vararg =
                        Some(Arg { name: self.splat_name(child)?, annotation: None });
                }
                "dictionary_splat_pattern" => {
                    params.kwarg = Some(Arg { name: self.splat_name(child)?, annotation: None });
                }
                "keyword_separator" => seen_star = true,
                "positional_separator" => {
                    // Everything collected so far is positional-only.
                    params.posonly = std::mem::take(&mut params.args);
                }
                _ => return Err(self.unsupported(child)),
            }
        }
        Ok(params)
    }

    fn splat_name(&self, node: Node) -> Result<String> {
        let inner = self
            .named(node)
            .into_iter()
            .next()
            .ok_or_else(|| self.err(node, "splat without name"))?;
        Ok(self.text(inner).to_string())
    }

    /// Annotations arrive wrapped in a `type` node with its own sub-grammar.
    fn type_expr(&self, node: Node) -> Result<Expr> {
        match node.kind() {
            "type" => {
                let inner = self
                    .named(node)
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.err(node, "empty annotation"))?;
                self.type_expr(inner)
            }
            "union_type" => {
                let left = self.type_expr(self.field(node, "left")?)?;
                let right = self.type_expr(self.field(node, "right")?)?;
                Ok(Expr::BinOp { left: Box::new(left), op: "|".to_string(), right: Box::new(right) })
            }
            "member_type" => {
                let kids = self.named(node);
                match kids.as_slice() {
                    [value, attr] => Ok(Expr::Attribute {
                        value: Box::new(self.type_expr(*value)?),
                        attr: self.text(*attr).to_string(),
                    }),
                    _ => Err(self.unsupported(node)),
                }
            }
            "generic_type" => {
                let kids = self.named(node);
                match kids.as_slice() {
                    [value, param] if param.kind() == "type_parameter" => {
                        let mut indices: Vec<Expr> = self
                            .named(*param)
                            .into_iter()
                            .map(|t| self.type_expr(t))
                            .collect::<Result<_>>()?;
                        let index = if indices.len() == 1 {
                            indices.remove(0)
                        } else {
                            Expr::Tuple(indices)
                        };
                        Ok(Expr::Subscript {
                            value: Box::new(self.type_expr(*value)?),
                            index: Box::new(index),
                        })
                    }
                    _ => Err(self.unsupported(node)),
                }
            }
            "splat_type" | "constrained_type" => Err(self.unsupported(node)),
            _ => self.expr(node),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn expr(&self, node: Node) -> Result<Expr> {
        match node.kind() {
            "identifier" | "keyword_identifier" => Ok(Expr::Name(self.text(node).to_string())),
            "integer" | "float" => Ok(Expr::Num(self.text(node).to_string())),
            "true" => Ok(Expr::TrueLit),
            "false" => Ok(Expr::FalseLit),
            "none" => Ok(Expr::NoneLit),
            "ellipsis" => Ok(Expr::EllipsisLit),
            "string" => self.string(node),
            "concatenated_string" => self.concatenated_string(node),
            "parenthesized_expression" => {
                let inner = self
                    .named(node)
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.err(node, "empty parentheses"))?;
                self.expr(inner)
            }
            "expression_list" | "pattern_list" | "tuple" | "tuple_pattern" => Ok(Expr::Tuple(
                self.named(node).into_iter().map(|c| self.element(c)).collect::<Result<_>>()?,
            )),
            "list" | "list_pattern" => Ok(Expr::List(
                self.named(node).into_iter().map(|c| self.element(c)).collect::<Result<_>>()?,
            )),
            "set" => Ok(Expr::Set(
                self.named(node).into_iter().map(|c| self.element(c)).collect::<Result<_>>()?,
            )),
            "dictionary" => {
                let mut items = Vec::new();
                for child in self.named(node) {
                    match child.kind() {
                        "pair" => {
                            let key = self.expr(self.field(child, "key")?)?;
                            let value = self.expr(self.field(child, "value")?)?;
                            items.push((Some(key), value));
                        }
                        "dictionary_splat" => items.push((None, self.splat_value(child)?)),
                        _ => return Err(self.unsupported(child)),
                    }
                }
                Ok(Expr::Dict(items))
            }
            "binary_operator" => {
                let left = self.expr(self.field(node, "left")?)?;
                let op = self.text(self.field(node, "operator")?).to_string();
                let right = self.expr(self.field(node, "right")?)?;
                Ok(Expr::BinOp { left: Box::new(left), op, right: Box::new(right) })
            }
            "boolean_operator" => self.boolean_operator(node),
            "not_operator" => {
                let operand = self.expr(self.field(node, "argument")?)?;
                Ok(Expr::UnaryOp { op: "not".to_string(), operand: Box::new(operand) })
            }
            "unary_operator" => {
                let op = self.text(self.field(node, "operator")?).to_string();
                let operand = self.expr(self.field(node, "argument")?)?;
                Ok(Expr::UnaryOp { op, operand: Box::new(operand) })
            }
            "comparison_operator" => {
                let operands = self.named(node);
                // two-word operators reach us as one source span; collapse
                // any interior whitespace to the canonical single space
                let ops: Vec<String> = self
                    .fields(node, "operators")
                    .iter()
                    .map(|o| self.text(*o).split_whitespace().collect::<Vec<_>>().join(" "))
                    .collect();
                if operands.len() != ops.len() + 1 {
                    return Err(self.err(node, "malformed comparison"));
                }
                let mut iter = operands.into_iter();
                let left = self.expr(iter.next().ok_or_else(|| self.err(node, "empty comparison"))?)?;
                let comparators =
                    iter.map(|c| self.expr(c)).collect::<Result<Vec<_>>>()?;
                Ok(Expr::Compare { left: Box::new(left), ops, comparators })
            }
            "lambda" => {
                let params = match node.child_by_field_name("parameters") {
                    Some(p) => self.parameters(p)?,
                    None => Parameters::default(),
                };
                let body = self.expr(self.field(node, "body")?)?;
                Ok(Expr::Lambda { params, body: Box::new(body) })
            }
            "conditional_expression" => {
                let kids = self.named(node);
                match kids.as_slice() {
                    [body, test, orelse] => Ok(Expr::IfExp {
                        body: Box::new(self.expr(*body)?),
                        test: Box::new(self.expr(*test)?),
                        orelse: Box::new(self.expr(*orelse)?),
                    }),
                    _ => Err(self.err(node, "malformed conditional expression")),
                }
            }
            "named_expression" => {
                let target = self.expr(self.field(node, "name")?)?;
                let value = self.expr(self.field(node, "value")?)?;
                Ok(Expr::NamedExpr { target: Box::new(target), value: Box::new(value) })
            }
            "call" => self.call(node),
            "attribute" => {
                let value = self.expr(self.field(node, "object")?)?;
                let attr = self.text(self.field(node, "attribute")?).to_string();
                Ok(Expr::Attribute { value: Box::new(value), attr })
            }
            "subscript" => self.subscript(node),
            "slice" => self.slice(node),
            "list_splat" | "list_splat_pattern" => {
                Ok(Expr::Starred(Box::new(self.splat_value(node)?)))
            }
            "await" => {
                let inner = self
                    .named(node)
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.err(node, "empty await"))?;
                Ok(Expr::Await(Box::new(self.expr(inner)?)))
            }
            "yield" => {
                let mut cursor = node.walk();
                let from = node.children(&mut cursor).any(|c| c.kind() == "from");
                let kids = self.named(node);
                if from {
                    let inner =
                        kids.into_iter().next().ok_or_else(|| self.err(node, "empty yield from"))?;
                    Ok(Expr::YieldFrom(Box::new(self.expr(inner)?)))
                } else {
                    match kids.as_slice() {
                        [] => Ok(Expr::Yield(None)),
                        [one] => Ok(Expr::Yield(Some(Box::new(self.expr(*one)?)))),
                        many => Ok(Expr::Yield(Some(Box::new(Expr::Tuple(
                            many.iter().map(|&k| self.expr(k)).collect::<Result<_>>()?,
                        ))))),
                    }
                }
            }
            "list_comprehension" => {
                let elt = self.expr(self.field(node, "body")?)?;
                Ok(Expr::ListComp { elt: Box::new(elt), generators: self.generators(node)? })
            }
            "set_comprehension" => {
                let elt = self.expr(self.field(node, "body")?)?;
                Ok(Expr::SetComp { elt: Box::new(elt), generators: self.generators(node)? })
            }
            "generator_expression" => {
                let elt = self.expr(self.field(node, "body")?)?;
                Ok(Expr::GeneratorExp { elt: Box::new(elt), generators: self.generators(node)? })
            }
            "dictionary_comprehension" => {
                let pair = self.field(node, "body")?;
                let key = self.expr(self.field(pair, "key")?)?;
                let value = self.expr(self.field(pair, "value")?)?;
                Ok(Expr::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators: self.generators(node)?,
                })
            }
            _ => Err(self.unsupported(node)),
        }
    }

    /// Collection/call elements: splats become starred expressions.
    fn element(&self, node: Node) -> Result<Expr> {
        match node.kind() {
            "list_splat" | "list_splat_pattern" => {
                Ok(Expr::Starred(Box::new(self.splat_value(node)?)))
            }
            _ => self.expr(node),
        }
    }

    fn splat_value(&self, node: Node) -> Result<Expr> {
        let inner = self
            .named(node)
            .into_iter()
            .next()
            .ok_or_else(|| self.err(node, "empty splat"))?;
        self.expr(inner)
    }

    fn boolean_operator(&self, node: Node) -> Result<Expr> {
        let op_text = self.text(self.field(node, "operator")?);
        let op = if op_text == "and" { BoolOpKind::And } else { BoolOpKind::Or };
        let left = self.field(node, "left")?;
        let right = self.field(node, "right")?;
        // Chains of the same operator are flat in the canonical AST; only
        // syntactically nested (unparenthesized) chains flatten.
        let mut values = Vec::new();
        self.collect_boolop(left, op, &mut values)?;
        values.push(self.expr(right)?);
        Ok(Expr::BoolOp { op, values })
    }

    fn collect_boolop(&self, node: Node, op: BoolOpKind, values: &mut Vec<Expr>) -> Result<()> {
        if node.kind() == "boolean_operator" {
            let this_op = self.text(self.field(node, "operator")?);
            let this = if this_op == "and" { BoolOpKind::And } else { BoolOpKind::Or };
            if this == op {
                self.collect_boolop(self.field(node, "left")?, op, values)?;
                values.push(self.expr(self.field(node, "right")?)?);
                return Ok(());
            }
        }
        values.push(self.expr(node)?);
        Ok(())
    }

    fn call(&self, node: Node) -> Result<Expr> {
        let func = self.expr(self.field(node, "function")?)?;
        let arguments = self.field(node, "arguments")?;
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        match arguments.kind() {
            "generator_expression" => args.push(self.expr(arguments)?),
            "argument_list" => {
                for arg in self.named(arguments) {
                    match arg.kind() {
                        "keyword_argument" => {
                            let name = self.text(self.field(arg, "name")?).to_string();
                            let value = self.expr(self.field(arg, "value")?)?;
                            keywords.push(Keyword { arg: Some(name), value });
                        }
                        "dictionary_splat" => {
                            keywords.push(Keyword { arg: None, value: self.splat_value(arg)? })
                        }
                        "list_splat" => {
                            args.push(Expr::Starred(Box::new(self.splat_value(arg)?)))
                        }
                        _ => args.push(self.expr(arg)?),
                    }
                }
            }
            _ => return Err(self.unsupported(arguments)),
        }
        Ok(Expr::Call { func: Box::new(func), args, keywords })
    }

    fn subscript(&self, node: Node) -> Result<Expr> {
        let value = self.expr(self.field(node, "value")?)?;
        let subs = self.fields(node, "subscript");
        let mut cursor = node.walk();
        let commas = node.children(&mut cursor).filter(|c| c.kind() == ",").count();
        let index = if subs.len() == 1 && commas == 0 {
            self.expr(subs[0])?
        } else {
            Expr::Tuple(subs.iter().map(|&s| self.expr(s)).collect::<Result<_>>()?)
        };
        Ok(Expr::Subscript { value: Box::new(value), index: Box::new(index) })
    }

    fn slice(&self, node: Node) -> Result<Expr> {
        let mut slots: [Option<Expr>; 3] = [None, None, None];
        let mut slot = 0usize;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == ":" {
                slot += 1;
            } else if child.is_named() && child.kind() != "comment" {
                if slot > 2 {
                    return Err(self.err(node, "malformed slice"));
                }
                slots[slot] = Some(self.expr(child)?);
            }
        }
        let [lower, upper, step] = slots;
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            step: step.map(Box::new),
        })
    }

    fn generators(&self, node: Node) -> Result<Vec<Comprehension>> {
        let body_id = self.field(node, "body")?.id();
        let mut generators: Vec<Comprehension> = Vec::new();
        for child in self.named(node) {
            if child.id() == body_id {
                continue;
            }
            match child.kind() {
                "for_in_clause" => {
                    let target = self.expr(self.field(child, "left")?)?;
                    let rights = self.fields(child, "right");
                    let iter = match rights.as_slice() {
                        [one] => self.expr(*one)?,
                        many => Expr::Tuple(
                            many.iter().map(|&r| self.expr(r)).collect::<Result<_>>()?,
                        ),
                    };
                    generators.push(Comprehension {
                        is_async: is_async(child),
                        target,
                        iter,
                        ifs: Vec::new(),
                    });
                }
                "if_clause" => {
                    let inner = self
                        .named(child)
                        .into_iter()
                        .next()
                        .ok_or_else(|| self.err(child, "empty if clause"))?;
                    let cond = self.expr(inner)?;
                    match generators.last_mut() {
                        Some(generator) => generator.ifs.push(cond),
                        None => return Err(self.err(child, "if clause before for clause")),
                    }
                }
                _ => return Err(self.unsupported(child)),
            }
        }
        Ok(generators)
    }

    // -----------------------------------------------------------------------
    // String literals
    // -----------------------------------------------------------------------

    fn string(&self, node: Node) -> Result<Expr> {
        let kids = self.named(node);
        let start = kids
            .iter()
            .copied()
            .find(|c| c.kind() == "string_start")
            .ok_or_else(|| self.err(node, "string without start token"))?;
        let prefix: String =
            self.text(start).chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        let is_raw = prefix.chars().any(|c| c == 'r' || c == 'R');
        let is_bytes = prefix.chars().any(|c| c == 'b' || c == 'B');
        let is_fstring = prefix.chars().any(|c| c == 'f' || c == 'F');

        if is_fstring {
            return self.fstring(node, is_raw);
        }

        if is_bytes {
            let mut value = Vec::new();
            for kid in &kids {
                match kid.kind() {
                    "string_content" => self.decode_bytes_content(*kid, is_raw, &mut value)?,
                    "string_start" | "string_end" => {}
                    _ => return Err(self.unsupported(*kid)),
                }
            }
            return Ok(Expr::Bytes(value));
        }

        let mut value = String::new();
        for kid in &kids {
            match kid.kind() {
                "string_content" => self.decode_str_content(*kid, is_raw, &mut value)?,
                "string_start" | "string_end" => {}
                _ => return Err(self.unsupported(*kid)),
            }
        }
        Ok(Expr::Str(value))
    }

    fn concatenated_string(&self, node: Node) -> Result<Expr> {
        let mut parts = Vec::new();
        for kid in self.named(node) {
            if kid.kind() == "string" {
                parts.push(self.string(kid)?);
            }
        }
        if parts.iter().any(|p| matches!(p, Expr::FString(_))) {
            let mut merged: Vec<FStringPart> = Vec::new();
            for part in parts {
                match part {
                    Expr::FString(ps) => merged.extend(ps),
                    Expr::Str(s) => merged.push(FStringPart::Literal(s)),
                    _ => return Err(self.err(node, "cannot mix bytes and str literals")),
                }
            }
            return Ok(Expr::FString(coalesce_literals(merged)));
        }
        if parts.iter().all(|p| matches!(p, Expr::Bytes(_))) && !parts.is_empty() {
            let mut merged = Vec::new();
            for part in parts {
                if let Expr::Bytes(b) = part {
                    merged.extend(b);
                }
            }
            return Ok(Expr::Bytes(merged));
        }
        let mut merged = String::new();
        for part in parts {
            match part {
                Expr::Str(s) => merged.push_str(&s),
                _ => return Err(self.err(node, "cannot mix bytes and str literals")),
            }
        }
        Ok(Expr::Str(merged))
    }

    fn fstring(&self, node: Node, is_raw: bool) -> Result<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        for kid in self.named(node) {
            match kid.kind() {
                "string_start" | "string_end" => {}
                "string_content" => {
                    let mut text = String::new();
                    self.decode_str_content(kid, is_raw, &mut text)?;
                    parts.push(FStringPart::Literal(text));
                }
                "interpolation" => parts.extend(self.interpolation(kid)?),
                _ => return Err(self.unsupported(kid)),
            }
        }
        Ok(Expr::FString(coalesce_literals(parts)))
    }

    fn interpolation(&self, node: Node) -> Result<Vec<FStringPart>> {
        let expr_node = self.field(node, "expression")?;
        let value = self.expr(expr_node)?;

        let mut cursor = node.walk();
        let self_documenting = node.children(&mut cursor).any(|c| c.kind() == "=");

        let mut conversion = None;
        let mut spec = None;
        for kid in self.named(node) {
            match kid.kind() {
                "type_conversion" => {
                    conversion = self.text(kid).chars().nth(1);
                }
                "format_specifier" => {
                    let text = self.text(kid);
                    spec = Some(text.strip_prefix(':').unwrap_or(text).to_string());
                }
                _ => {}
            }
        }

        if self_documenting {
            // `f'{x=}'` is literal text plus a repr-converted value.
            let literal = format!("{}=", self.text(expr_node));
            if conversion.is_none() && spec.is_none() {
                conversion = Some('r');
            }
            return Ok(vec![
                FStringPart::Literal(literal),
                FStringPart::Interp { value, conversion, spec },
            ]);
        }

        Ok(vec![FStringPart::Interp { value, conversion, spec }])
    }

    fn decode_str_content(&self, node: Node, is_raw: bool, out: &mut String) -> Result<()> {
        let mut pos = node.start_byte();
        for kid in self.named(node) {
            out.push_str(&self.src[pos..kid.start_byte()]);
            match kid.kind() {
                // raw strings keep their backslashes
                "escape_sequence" if is_raw => out.push_str(self.text(kid)),
                "escape_sequence" => out.push_str(&decode_escape(self.text(kid))),
                "escape_interpolation" => {
                    // `{{` or `}}` in an f-string literal chunk.
                    let text = self.text(kid);
                    out.push_str(&text[..1]);
                }
                _ => out.push_str(self.text(kid)),
            }
            pos = kid.end_byte();
        }
        out.push_str(&self.src[pos..node.end_byte()]);
        Ok(())
    }

    fn decode_bytes_content(&self, node: Node, is_raw: bool, out: &mut Vec<u8>) -> Result<()> {
        if is_raw {
            out.extend_from_slice(self.text(node).as_bytes());
            return Ok(());
        }
        let mut pos = node.start_byte();
        for kid in self.named(node) {
            out.extend_from_slice(self.src[pos..kid.start_byte()].as_bytes());
            if kid.kind() == "escape_sequence" {
                out.extend_from_slice(&decode_escape_bytes(self.text(kid)));
            } else {
                out.extend_from_slice(self.text(kid).as_bytes());
            }
            pos = kid.end_byte();
        }
        out.extend_from_slice(self.src[pos..node.end_byte()].as_bytes());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Escape decoding
// ---------------------------------------------------------------------------

fn decode_escape(text: &str) -> String {
    let rest = text.strip_prefix('\\').unwrap_or(text);
    let first = match rest.chars().next() {
        Some(c) => c,
        None => return String::new(),
    };
    let tail = &rest[first.len_utf8()..];
    match first {
        '\n' => String::new(),
        '\\' => "\\".to_string(),
        '\'' => "'".to_string(),
        '"' => "\"".to_string(),
        'a' => "\x07".to_string(),
        'b' => "\x08".to_string(),
        'f' => "\x0c".to_string(),
        'n' => "\n".to_string(),
        'r' => "\r".to_string(),
        't' => "\t".to_string(),
        'v' => "\x0b".to_string(),
        '0'..='7' => {
            let octal: String = rest.chars().take(3).take_while(|c| c.is_digit(8)).collect();
            let value = u32::from_str_radix(&octal, 8).unwrap_or(0);
            let decoded = char::from_u32(value).map(String::from).unwrap_or_default();
            format!("{decoded}{}", &rest[octal.len()..])
        }
        'x' => u32::from_str_radix(tail, 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| text.to_string()),
        'u' | 'U' => u32::from_str_radix(tail, 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| text.to_string()),
        // Named escapes keep their source form; unknown escapes keep the
        // backslash verbatim, as the language itself does.
        'N' => text.to_string(),
        _ => format!("\\{rest}"),
    }
}

fn decode_escape_bytes(text: &str) -> Vec<u8> {
    let rest = text.strip_prefix('\\').unwrap_or(text);
    let first = match rest.chars().next() {
        Some(c) => c,
        None => return Vec::new(),
    };
    let tail = &rest[first.len_utf8()..];
    match first {
        '\n' => Vec::new(),
        '\\' => vec![b'\\'],
        '\'' => vec![b'\''],
        '"' => vec![b'"'],
        'a' => vec![0x07],
        'b' => vec![0x08],
        'f' => vec![0x0c],
        'n' => vec![b'\n'],
        'r' => vec![b'\r'],
        't' => vec![b'\t'],
        'v' => vec![0x0b],
        '0'..='7' => {
            let octal: String = rest.chars().take(3).take_while(|c| c.is_digit(8)).collect();
            let value = u32::from_str_radix(&octal, 8).unwrap_or(0);
            let mut out = vec![(value & 0xff) as u8];
            out.extend_from_slice(rest[octal.len()..].as_bytes());
            out
        }
        'x' => match u8::from_str_radix(tail, 16) {
            Ok(b) => vec![b],
            Err(_) => text.as_bytes().to_vec(),
        },
        _ => {
            let mut out = vec![b'\\'];
            out.extend_from_slice(rest.as_bytes());
            out
        }
    }
}

/// Merge adjacent literal parts and drop empty ones.
fn coalesce_literals(parts: Vec<FStringPart>) -> Vec<FStringPart> {
    let mut out: Vec<FStringPart> = Vec::new();
    for part in parts {
        match part {
            FStringPart::Literal(text) => {
                if text.is_empty() {
                    continue;
                }
                if let Some(FStringPart::Literal(prev)) = out.last_mut() {
                    prev.push_str(&text);
                } else {
                    out.push(FStringPart::Literal(text));
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::unparse_module;

    fn rt(src: &str) -> String {
        unparse_module(&parse_module(src).expect("parse"))
    }

    #[test]
    fn test_rejects_syntax_errors() {
        assert!(parse_module("def f(:\n").is_err());
        assert!(parse_module("x = = 2").is_err());
    }

    #[test]
    fn test_rejects_py2_print() {
        assert!(parse_module("print 'hello'").is_err());
    }

    #[test]
    fn test_empty_module() {
        let m = parse_module("").unwrap();
        assert!(m.body.is_empty());
        let m = parse_module("   \n\n").unwrap();
        assert!(m.body.is_empty());
    }

    #[test]
    fn test_comments_are_dropped() {
        assert_eq!(rt("x = 1  # trailing\n# leading\ny = 2"), "x = 1\ny = 2");
    }

    #[test]
    fn test_import_forms() {
        assert_eq!(rt("import os, sys as system"), "import os, sys as system");
        assert_eq!(rt("from a.b import c as d, e"), "from a.b import c as d, e");
        assert_eq!(rt("from .. import x"), "from .. import x");
        assert_eq!(rt("from ..pkg import x"), "from ..pkg import x");
        assert_eq!(rt("from m import *"), "from m import *");
    }

    #[test]
    fn test_try_except() {
        assert_eq!(
            rt("try:\n    x()\nexcept ValueError as e:\n    pass\nfinally:\n    y()"),
            "try:\n    x()\nexcept ValueError as e:\n    pass\nfinally:\n    y()"
        );
        assert_eq!(rt("try:\n    x()\nexcept:\n    pass"), "try:\n    x()\nexcept:\n    pass");
    }

    #[test]
    fn test_with_items() {
        assert_eq!(
            rt("with open(p) as f, lock:\n    pass"),
            "with open(p) as f, lock:\n    pass"
        );
        assert_eq!(rt("async def g():\n    async with a as b:\n        pass"),
            "async def g():\n    async with a as b:\n        pass");
    }

    #[test]
    fn test_chained_assignment() {
        assert_eq!(rt("x = y = z = 0"), "x = y = z = 0");
    }

    #[test]
    fn test_walrus_and_yield() {
        assert_eq!(rt("if (n := len(a)) > 10:\n    pass"), "if (n := len(a)) > 10:\n    pass");
        assert_eq!(rt("def g():\n    yield 1"), "def g():\n    yield 1");
        assert_eq!(rt("def g():\n    yield from r"), "def g():\n    yield from r");
    }

    #[test]
    fn test_star_args_lowering() {
        assert_eq!(rt("f(*a, **b)"), "f(*a, **b)");
        assert_eq!(rt("x = [*a, b]"), "x = [*a, b]");
        assert_eq!(rt("d = {**a, 'k': 1}"), "d = {**a, 'k': 1}");
        assert_eq!(rt("a, *rest = items"), "a, *rest = items");
    }

    #[test]
    fn test_fstring_lowering() {
        assert_eq!(rt("x = f'{a}{b}'"), "x = f'{a}{b}'");
        // expression-free f-strings stay f-strings, braces stay doubled
        assert_eq!(rt("x = f'{{literal}}'"), "x = f'{{literal}}'");
        assert_eq!(rt("x = f'v={v}'"), "x = f'v={v}'");
    }

    #[test]
    fn test_implicit_concatenation() {
        assert_eq!(rt("x = 'a' 'b'"), "x = 'ab'");
        assert_eq!(rt("x = b'a' b'b'"), "x = b'ab'");
    }

    #[test]
    fn test_escape_roundtrip() {
        assert_eq!(rt(r#"x = 'a\tb\x00'"#), r#"x = 'a\tb\x00'"#);
        assert_eq!(rt(r#"x = r'a\tb'"#), r#"x = 'a\\tb'"#);
    }

    #[test]
    fn test_triple_quoted() {
        assert_eq!(rt("x = '''line1\nline2'''"), "x = 'line1\\nline2'");
    }

    #[test]
    fn test_function_ranges_top_level() {
        let src = "def f():\n    pass\n\ndef g():\n    pass";
        let ranges = find_function_ranges(src).unwrap();
        let spans: Vec<(usize, usize)> = ranges.iter().map(|(s, e, _)| (*s, *e)).collect();
        assert_eq!(spans, vec![(0, 2), (3, 5)]);
    }

    #[test]
    fn test_function_ranges_skip_nested() {
        let src = "def outer():\n\n    def inner():\n        pass\n    return inner";
        let ranges = find_function_ranges(src).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].0, ranges[0].1), (0, 5));
    }

    #[test]
    fn test_function_ranges_class_methods() {
        let src = "class X:\n\n    def m(self):\n        pass";
        let ranges = find_function_ranges(src).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].0, ranges[0].1), (2, 4));
    }

    #[test]
    fn test_function_ranges_decorated() {
        let src = "@dec\ndef f():\n    pass";
        let ranges = find_function_ranges(src).unwrap();
        assert_eq!((ranges[0].0, ranges[0].1), (0, 3));
    }

    #[test]
    fn test_function_ranges_async_not_covered() {
        let src = "async def f():\n    pass";
        let ranges = find_function_ranges(src).unwrap();
        assert!(ranges.is_empty());
    }
}
