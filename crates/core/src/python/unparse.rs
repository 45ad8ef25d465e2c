//! Canonical source generation for the typed Python AST.
//!
//! The output format follows CPython's `ast.unparse`: four-space indents, one
//! blank line before function and class definitions, single-quoted string
//! literals, and precedence-driven parenthesization. Identical trees always
//! serialize to identical text; the serialization is what gets hashed.

use super::{
    Alias, BoolOpKind, ClassDef, Comprehension, Expr, ExceptHandler, FStringPart, FunctionDef,
    Keyword, Module, Param, Parameters, Stmt, Try, With,
};

// ---------------------------------------------------------------------------
// Operator precedence
// ---------------------------------------------------------------------------

/// Context precedence levels, lowest binding first. An expression is wrapped
/// in parentheses when its own level is below the level its context demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    NamedExpr,
    Tuple,
    Yield,
    Test,
    Or,
    And,
    Not,
    Cmp,
    /// `|` — also the level of starred expressions.
    Bor,
    Bxor,
    Band,
    Shift,
    Arith,
    Term,
    Factor,
    Power,
    Await,
    Atom,
}

impl Prec {
    fn next(self) -> Prec {
        use Prec::*;
        match self {
            NamedExpr => Tuple,
            Tuple => Yield,
            Yield => Test,
            Test => Or,
            Or => And,
            And => Not,
            Not => Cmp,
            Cmp => Bor,
            Bor => Bxor,
            Bxor => Band,
            Band => Shift,
            Shift => Arith,
            Arith => Term,
            Term => Factor,
            Factor => Power,
            Power => Await,
            Await => Atom,
            Atom => Atom,
        }
    }
}

fn binop_prec(op: &str) -> Prec {
    match op {
        "|" => Prec::Bor,
        "^" => Prec::Bxor,
        "&" => Prec::Band,
        "<<" | ">>" => Prec::Shift,
        "+" | "-" => Prec::Arith,
        "*" | "@" | "/" | "//" | "%" => Prec::Term,
        "**" => Prec::Power,
        _ => Prec::Test,
    }
}

fn unaryop_prec(op: &str) -> Prec {
    if op == "not" {
        Prec::Not
    } else {
        Prec::Factor
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Serialize a whole module. No trailing newline.
pub fn unparse_module(module: &Module) -> String {
    let mut u = Unparser::new();
    for stmt in &module.body {
        u.stmt(stmt);
    }
    u.out
}

/// Serialize a single statement at column zero (used for function segments).
pub fn unparse_stmt(stmt: &Stmt) -> String {
    let mut u = Unparser::new();
    u.stmt(stmt);
    u.out
}

// ---------------------------------------------------------------------------
// Unparser
// ---------------------------------------------------------------------------

struct Unparser {
    out: String,
    indent: usize,
}

impl Unparser {
    fn new() -> Self {
        Self { out: String::new(), indent: 0 }
    }

    fn write(&mut self, s: &str) {
        self.out.push_str(s);
    }

    /// Newline if anything was emitted yet.
    fn maybe_newline(&mut self) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
    }

    /// Start a fresh indented line with `text`.
    fn fill(&mut self, text: &str) {
        self.maybe_newline();
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
    }

    fn block(&mut self, body: &[Stmt]) {
        self.indent += 1;
        for stmt in body {
            self.stmt(stmt);
        }
        self.indent -= 1;
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(f) => self.function_def(f),
            Stmt::ClassDef(c) => self.class_def(c),
            Stmt::Return(value) => {
                self.fill("return");
                if let Some(v) = value {
                    self.write(" ");
                    self.expr(v, Prec::Test);
                }
            }
            Stmt::Delete(targets) => {
                self.fill("del ");
                self.comma_exprs(targets, Prec::Test);
            }
            Stmt::Assign { targets, value } => {
                self.fill("");
                for target in targets {
                    self.expr(target, Prec::Tuple);
                    self.write(" = ");
                }
                self.expr(value, Prec::Test);
            }
            Stmt::AugAssign { target, op, value } => {
                self.fill("");
                self.expr(target, Prec::Test);
                self.write(" ");
                self.write(op);
                self.write("= ");
                self.expr(value, Prec::Test);
            }
            Stmt::AnnAssign { target, annotation, value } => {
                self.fill("");
                self.expr(target, Prec::Test);
                self.write(": ");
                self.expr(annotation, Prec::Test);
                if let Some(v) = value {
                    self.write(" = ");
                    self.expr(v, Prec::Test);
                }
            }
            Stmt::For(f) => {
                self.fill(if f.is_async { "async for " } else { "for " });
                self.expr(&f.target, Prec::Tuple);
                self.write(" in ");
                self.expr(&f.iter, Prec::Test);
                self.write(":");
                self.block(&f.body);
                if !f.orelse.is_empty() {
                    self.fill("else:");
                    self.block(&f.orelse);
                }
            }
            Stmt::While { test, body, orelse } => {
                self.fill("while ");
                self.expr(test, Prec::Test);
                self.write(":");
                self.block(body);
                if !orelse.is_empty() {
                    self.fill("else:");
                    self.block(orelse);
                }
            }
            Stmt::If { test, body, orelse } => self.if_stmt(test, body, orelse, false),
            Stmt::With(w) => self.with_stmt(w),
            Stmt::Match { subject, cases } => {
                self.fill("match ");
                self.expr(subject, Prec::Tuple);
                self.write(":");
                self.indent += 1;
                for case in cases {
                    self.fill("case ");
                    self.write(&case.pattern);
                    if let Some(guard) = &case.guard {
                        self.write(" if ");
                        self.expr(guard, Prec::Test);
                    }
                    self.write(":");
                    self.block(&case.body);
                }
                self.indent -= 1;
            }
            Stmt::Raise { exc, cause } => {
                self.fill("raise");
                if let Some(e) = exc {
                    self.write(" ");
                    self.expr(e, Prec::Test);
                }
                if let Some(c) = cause {
                    self.write(" from ");
                    self.expr(c, Prec::Test);
                }
            }
            Stmt::Try(t) => self.try_stmt(t),
            Stmt::Assert { test, msg } => {
                self.fill("assert ");
                self.expr(test, Prec::Test);
                if let Some(m) = msg {
                    self.write(", ");
                    self.expr(m, Prec::Test);
                }
            }
            Stmt::Import(names) => {
                self.fill("import ");
                self.aliases(names);
            }
            Stmt::ImportFrom { module, names, level } => {
                self.fill("from ");
                for _ in 0..*level {
                    self.write(".");
                }
                if let Some(m) = module {
                    self.write(m);
                }
                self.write(" import ");
                self.aliases(names);
            }
            Stmt::Global(names) => {
                self.fill("global ");
                let joined = names.join(", ");
                self.write(&joined);
            }
            Stmt::Nonlocal(names) => {
                self.fill("nonlocal ");
                let joined = names.join(", ");
                self.write(&joined);
            }
            Stmt::Expr(value) => {
                self.fill("");
                self.expr(value, Prec::Yield);
            }
            Stmt::Pass => self.fill("pass"),
            Stmt::Break => self.fill("break"),
            Stmt::Continue => self.fill("continue"),
        }
    }

    fn if_stmt(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt], as_elif: bool) {
        self.fill(if as_elif { "elif " } else { "if " });
        self.expr(test, Prec::Test);
        self.write(":");
        self.block(body);
        match orelse {
            [] => {}
            // A lone nested `if` in the else branch collapses into `elif`.
            [Stmt::If { test, body, orelse }] => self.if_stmt(test, body, orelse, true),
            _ => {
                self.fill("else:");
                self.block(orelse);
            }
        }
    }

    fn with_stmt(&mut self, w: &With) {
        self.fill(if w.is_async { "async with " } else { "with " });
        let mut first = true;
        for item in &w.items {
            if !first {
                self.write(", ");
            }
            first = false;
            self.expr(&item.context, Prec::Test);
            if let Some(vars) = &item.vars {
                self.write(" as ");
                self.expr(vars, Prec::Test);
            }
        }
        self.write(":");
        self.block(&w.body);
    }

    fn try_stmt(&mut self, t: &Try) {
        self.fill("try:");
        self.block(&t.body);
        for handler in &t.handlers {
            self.except_handler(handler, t.is_star);
        }
        if !t.orelse.is_empty() {
            self.fill("else:");
            self.block(&t.orelse);
        }
        if !t.finalbody.is_empty() {
            self.fill("finally:");
            self.block(&t.finalbody);
        }
    }

    fn except_handler(&mut self, handler: &ExceptHandler, is_star: bool) {
        self.fill(if is_star { "except*" } else { "except" });
        if let Some(typ) = &handler.typ {
            self.write(" ");
            self.expr(typ, Prec::Test);
        }
        if let Some(name) = &handler.name {
            self.write(" as ");
            self.write(name);
        }
        self.write(":");
        self.block(&handler.body);
    }

    fn function_def(&mut self, f: &FunctionDef) {
        // Blank separator line before defs, matching the canonical style.
        self.maybe_newline();
        for dec in &f.decorators {
            self.fill("@");
            self.expr(dec, Prec::Test);
        }
        self.fill(if f.is_async { "async def " } else { "def " });
        self.write(&f.name);
        self.write("(");
        self.parameters(&f.params);
        self.write(")");
        if let Some(returns) = &f.returns {
            self.write(" -> ");
            self.expr(returns, Prec::Test);
        }
        self.write(":");
        self.block(&f.body);
    }

    fn class_def(&mut self, c: &ClassDef) {
        self.maybe_newline();
        for dec in &c.decorators {
            self.fill("@");
            self.expr(dec, Prec::Test);
        }
        self.fill("class ");
        self.write(&c.name);
        if !c.bases.is_empty() || !c.keywords.is_empty() {
            self.write("(");
            let mut first = true;
            for base in &c.bases {
                if !first {
                    self.write(", ");
                }
                first = false;
                self.expr(base, Prec::Test);
            }
            for kw in &c.keywords {
                if !first {
                    self.write(", ");
                }
                first = false;
                self.keyword(kw);
            }
            self.write(")");
        }
        self.write(":");
        self.block(&c.body);
    }

    fn parameters(&mut self, params: &Parameters) {
        let mut first = true;
        let mut sep = |u: &mut Self, first: &mut bool| {
            if !*first {
                u.write(", ");
            }
            *first = false;
        };

        for p in &params.posonly {
            sep(self, &mut first);
            self.param(p);
        }
        if !params.posonly.is_empty() {
            sep(self, &mut first);
            self.write("/");
        }
        for p in &params.args {
            sep(self, &mut first);
            self.param(p);
        }
        if let Some(vararg) = &params.vararg {
            sep(self, &mut first);
            self.write("*");
            self.write(&vararg.name);
            if let Some(ann) = &vararg.annotation {
                self.write(": ");
                self.expr(ann, Prec::Test);
            }
        } else if !params.kwonly.is_empty() {
            sep(self, &mut first);
            self.write("*");
        }
        for p in &params.kwonly {
            sep(self, &mut first);
            self.param(p);
        }
        if let Some(kwarg) = &params.kwarg {
            sep(self, &mut first);
            self.write("**");
            self.write(&kwarg.name);
            if let Some(ann) = &kwarg.annotation {
                self.write(": ");
                self.expr(ann, Prec::Test);
            }
        }
    }

    fn param(&mut self, p: &Param) {
        self.write(&p.arg.name);
        if let Some(ann) = &p.arg.annotation {
            self.write(": ");
            self.expr(ann, Prec::Test);
            if let Some(default) = &p.default {
                self.write(" = ");
                self.expr(default, Prec::Test);
            }
        } else if let Some(default) = &p.default {
            self.write("=");
            self.expr(default, Prec::Test);
        }
    }

    fn aliases(&mut self, names: &[Alias]) {
        let mut first = true;
        for alias in names {
            if !first {
                self.write(", ");
            }
            first = false;
            self.write(&alias.name);
            if let Some(asname) = &alias.asname {
                self.write(" as ");
                self.write(asname);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Write `expr` in a context demanding at least `ctx` precedence.
    fn expr(&mut self, expr: &Expr, ctx: Prec) {
        match expr {
            Expr::Name(id) => self.write(id),
            Expr::Num(raw) => self.write(raw),
            Expr::Str(value) => {
                let lit = encode_str(value);
                self.write(&lit);
            }
            Expr::Bytes(value) => {
                let lit = encode_bytes(value);
                self.write(&lit);
            }
            Expr::FString(parts) => self.fstring(parts),
            Expr::TrueLit => self.write("True"),
            Expr::FalseLit => self.write("False"),
            Expr::NoneLit => self.write("None"),
            Expr::EllipsisLit => self.write("..."),
            Expr::Tuple(elts) => {
                let parens = elts.is_empty() || ctx > Prec::Tuple;
                if parens {
                    self.write("(");
                }
                self.items_view(elts);
                if parens {
                    self.write(")");
                }
            }
            Expr::List(elts) => {
                self.write("[");
                self.comma_exprs(elts, Prec::Test);
                self.write("]");
            }
            Expr::Set(elts) => {
                // An empty set has no literal form and never parses; elements
                // are always present here.
                self.write("{");
                self.comma_exprs(elts, Prec::Test);
                self.write("}");
            }
            Expr::Dict(items) => {
                self.write("{");
                let mut first = true;
                for (key, value) in items {
                    if !first {
                        self.write(", ");
                    }
                    first = false;
                    match key {
                        Some(k) => {
                            self.expr(k, Prec::Test);
                            self.write(": ");
                            self.expr(value, Prec::Test);
                        }
                        None => {
                            self.write("**");
                            self.expr(value, Prec::Bor);
                        }
                    }
                }
                self.write("}");
            }
            Expr::BoolOp { op, values } => {
                let (word, prec) = match op {
                    BoolOpKind::And => (" and ", Prec::And),
                    BoolOpKind::Or => (" or ", Prec::Or),
                };
                self.parens_if(ctx > prec, |u| {
                    let mut first = true;
                    for value in values {
                        if !first {
                            u.write(word);
                        }
                        first = false;
                        u.expr(value, prec.next());
                    }
                });
            }
            Expr::BinOp { left, op, right } => {
                let prec = binop_prec(op);
                let (lp, rp) = if op == "**" { (prec.next(), prec) } else { (prec, prec.next()) };
                self.parens_if(ctx > prec, |u| {
                    u.expr(left, lp);
                    u.write(" ");
                    u.write(op);
                    u.write(" ");
                    u.expr(right, rp);
                });
            }
            Expr::UnaryOp { op, operand } => {
                let prec = unaryop_prec(op);
                self.parens_if(ctx > prec, |u| {
                    u.write(op);
                    if op == "not" {
                        u.write(" ");
                    }
                    u.expr(operand, prec);
                });
            }
            Expr::Compare { left, ops, comparators } => {
                self.parens_if(ctx > Prec::Cmp, |u| {
                    u.expr(left, Prec::Cmp.next());
                    for (op, comparator) in ops.iter().zip(comparators) {
                        u.write(" ");
                        u.write(op);
                        u.write(" ");
                        u.expr(comparator, Prec::Cmp.next());
                    }
                });
            }
            Expr::Call { func, args, keywords } => {
                self.expr(func, Prec::Atom);
                self.write("(");
                let mut first = true;
                for arg in args {
                    if !first {
                        self.write(", ");
                    }
                    first = false;
                    self.expr(arg, Prec::Test);
                }
                for kw in keywords {
                    if !first {
                        self.write(", ");
                    }
                    first = false;
                    self.keyword(kw);
                }
                self.write(")");
            }
            Expr::Attribute { value, attr } => {
                self.expr(value, Prec::Atom);
                // `1.x` is a float followed by garbage; decimal integers need
                // a separating space before the dot.
                if let Expr::Num(raw) = value.as_ref() {
                    if raw.bytes().all(|b| b.is_ascii_digit() || b == b'_') {
                        self.write(" ");
                    }
                }
                self.write(".");
                self.write(attr);
            }
            Expr::Subscript { value, index } => {
                self.expr(value, Prec::Atom);
                self.write("[");
                match index.as_ref() {
                    Expr::Tuple(elts) if !elts.is_empty() => self.items_view(elts),
                    other => self.expr(other, Prec::Test),
                }
                self.write("]");
            }
            Expr::Starred(value) => {
                self.write("*");
                self.expr(value, Prec::Bor);
            }
            Expr::Lambda { params, body } => {
                self.parens_if(ctx > Prec::Test, |u| {
                    if params.is_empty() {
                        u.write("lambda");
                    } else {
                        u.write("lambda ");
                        u.parameters(params);
                    }
                    u.write(": ");
                    u.expr(body, Prec::Test);
                });
            }
            Expr::IfExp { body, test, orelse } => {
                self.parens_if(ctx > Prec::Test, |u| {
                    u.expr(body, Prec::Test.next());
                    u.write(" if ");
                    u.expr(test, Prec::Test.next());
                    u.write(" else ");
                    u.expr(orelse, Prec::Test);
                });
            }
            Expr::ListComp { elt, generators } => {
                self.write("[");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write("]");
            }
            Expr::SetComp { elt, generators } => {
                self.write("{");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write("}");
            }
            Expr::DictComp { key, value, generators } => {
                self.write("{");
                self.expr(key, Prec::Test);
                self.write(": ");
                self.expr(value, Prec::Test);
                self.generators(generators);
                self.write("}");
            }
            Expr::GeneratorExp { elt, generators } => {
                self.write("(");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write(")");
            }
            Expr::Await(value) => {
                self.parens_if(ctx > Prec::Await, |u| {
                    u.write("await ");
                    u.expr(value, Prec::Atom);
                });
            }
            Expr::Yield(value) => {
                self.parens_if(ctx > Prec::Yield, |u| {
                    u.write("yield");
                    if let Some(v) = value {
                        u.write(" ");
                        u.expr(v, Prec::Atom);
                    }
                });
            }
            Expr::YieldFrom(value) => {
                self.parens_if(ctx > Prec::Yield, |u| {
                    u.write("yield from ");
                    u.expr(value, Prec::Atom);
                });
            }
            Expr::NamedExpr { target, value } => {
                self.parens_if(ctx > Prec::NamedExpr, |u| {
                    u.expr(target, Prec::Atom);
                    u.write(" := ");
                    u.expr(value, Prec::Atom);
                });
            }
            Expr::Slice { lower, upper, step } => {
                if let Some(l) = lower {
                    self.expr(l, Prec::Test);
                }
                self.write(":");
                if let Some(u) = upper {
                    self.expr(u, Prec::Test);
                }
                if let Some(s) = step {
                    self.write(":");
                    self.expr(s, Prec::Test);
                }
            }
        }
    }

    fn parens_if(&mut self, needed: bool, f: impl FnOnce(&mut Self)) {
        if needed {
            self.write("(");
        }
        f(self);
        if needed {
            self.write(")");
        }
    }

    fn comma_exprs(&mut self, exprs: &[Expr], prec: Prec) {
        let mut first = true;
        for e in exprs {
            if !first {
                self.write(", ");
            }
            first = false;
            self.expr(e, prec);
        }
    }

    /// Comma-joined elements with the single-element trailing comma.
    fn items_view(&mut self, elts: &[Expr]) {
        if elts.len() == 1 {
            self.expr(&elts[0], Prec::Test);
            self.write(",");
        } else {
            self.comma_exprs(elts, Prec::Test);
        }
    }

    fn keyword(&mut self, kw: &Keyword) {
        match &kw.arg {
            Some(name) => {
                self.write(name);
                self.write("=");
                self.expr(&kw.value, Prec::Test);
            }
            None => {
                self.write("**");
                self.expr(&kw.value, Prec::Test);
            }
        }
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for gen in generators {
            self.write(if gen.is_async { " async for " } else { " for " });
            self.expr(&gen.target, Prec::Tuple);
            self.write(" in ");
            self.expr(&gen.iter, Prec::Test.next());
            for if_clause in &gen.ifs {
                self.write(" if ");
                self.expr(if_clause, Prec::Test.next());
            }
        }
    }

    fn fstring(&mut self, parts: &[FStringPart]) {
        // Render the body first, then pick the first quote character that
        // does not collide with embedded expression text.
        let mut exprs_text = String::new();
        for part in parts {
            if let FStringPart::Interp { value, .. } = part {
                let mut inner = Unparser::new();
                inner.expr(value, Prec::Test.next());
                exprs_text.push_str(&inner.out);
            }
        }
        let quote = if !exprs_text.contains('\'') {
            '\''
        } else if !exprs_text.contains('"') {
            '"'
        } else {
            // Both quote kinds appear inside expressions; fall back to the
            // triple-quoted form, which tolerates either.
            '\0'
        };
        let (open, close, q) = if quote == '\0' {
            ("f'''", "'''", '\'')
        } else if quote == '\'' {
            ("f'", "'", '\'')
        } else {
            ("f\"", "\"", '"')
        };
        self.write(open);
        for part in parts {
            match part {
                FStringPart::Literal(text) => {
                    let escaped = escape_fstring_literal(text, q, quote == '\0');
                    self.write(&escaped);
                }
                FStringPart::Interp { value, conversion, spec } => {
                    self.write("{");
                    let mut inner = Unparser::new();
                    inner.expr(value, Prec::Test.next());
                    // A leading `{` would read as `{{`.
                    if inner.out.starts_with('{') {
                        self.write(" ");
                    }
                    self.write(&inner.out);
                    if let Some(conv) = conversion {
                        self.write("!");
                        let mut buf = [0u8; 4];
                        self.write(conv.encode_utf8(&mut buf));
                    }
                    if let Some(spec) = spec {
                        self.write(":");
                        self.write(spec);
                    }
                    self.write("}");
                }
            }
        }
        self.write(close);
    }
}

// ---------------------------------------------------------------------------
// Literal encoding
// ---------------------------------------------------------------------------

/// Encode a decoded string value as a canonical Python literal: single quotes
/// unless the value contains one and no double quote.
fn encode_str(value: &str) -> String {
    let has_sq = value.contains('\'');
    let has_dq = value.contains('"');
    let quote = if has_sq && !has_dq { '"' } else { '\'' };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let cp = c as u32;
                if cp <= 0xff {
                    out.push_str(&format!("\\x{cp:02x}"));
                } else if cp <= 0xffff {
                    out.push_str(&format!("\\u{cp:04x}"));
                } else {
                    out.push_str(&format!("\\U{cp:08x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Encode a bytes value as a canonical `b'...'` literal.
fn encode_bytes(value: &[u8]) -> String {
    let has_sq = value.contains(&b'\'');
    let has_dq = value.contains(&b'"');
    let quote = if has_sq && !has_dq { b'"' } else { b'\'' };
    let mut out = String::with_capacity(value.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in value {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push(quote as char);
    out
}

/// Escape a literal chunk of an f-string: braces double, quotes and control
/// characters escape as in plain strings.
fn escape_fstring_literal(text: &str, quote: char, triple: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '{' => out.push_str("{{"),
            '}' => out.push_str("}}"),
            '\\' => out.push_str("\\\\"),
            '\n' if !triple => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote && !triple => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() && c != '\n' => {
                let cp = c as u32;
                if cp <= 0xff {
                    out.push_str(&format!("\\x{cp:02x}"));
                } else {
                    out.push_str(&format!("\\u{cp:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::parse_module;
    use super::*;

    fn roundtrip(src: &str) -> String {
        unparse_module(&parse_module(src).expect("parse"))
    }

    #[test]
    fn test_assign() {
        assert_eq!(roundtrip("x=1"), "x = 1");
        assert_eq!(roundtrip("x = y = 1"), "x = y = 1");
        assert_eq!(roundtrip("x += 1"), "x += 1");
    }

    #[test]
    fn test_tuple_parens() {
        assert_eq!(roundtrip("x, y = y, x"), "x, y = (y, x)");
        assert_eq!(roundtrip("t = ()"), "t = ()");
        assert_eq!(roundtrip("t = (1,)"), "t = (1,)");
        assert_eq!(roundtrip("return_value = 1, 2"), "return_value = (1, 2)");
    }

    #[test]
    fn test_string_quoting() {
        assert_eq!(roundtrip("x = \"f\""), "x = 'f'");
        assert_eq!(roundtrip("x = 'it\\'s'"), "x = \"it's\"");
        assert_eq!(roundtrip("x = '\\n'"), "x = '\\n'");
        assert_eq!(roundtrip("x = b\"ab\""), "x = b'ab'");
    }

    #[test]
    fn test_blank_line_before_def() {
        assert_eq!(roundtrip("x = 1\ndef f():\n    pass\ny = 2"), "x = 1\n\ndef f():\n    pass\ny = 2");
        assert_eq!(roundtrip("def f():\n    pass"), "def f():\n    pass");
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(roundtrip("x = (1 + 2) * 3"), "x = (1 + 2) * 3");
        assert_eq!(roundtrip("x = 1 + 2 * 3"), "x = 1 + 2 * 3");
        // power binds tighter than unary minus, so no parens are needed
        assert_eq!(roundtrip("x = -1 ** 2"), "x = -1 ** 2");
        assert_eq!(roundtrip("x = (-1) ** 2"), "x = (-1) ** 2");
        assert_eq!(roundtrip("x = not (a and b)"), "x = not (a and b)");
        assert_eq!(roundtrip("x = a < b < c"), "x = a < b < c");
        assert_eq!(roundtrip("x = a not  in b"), "x = a not in b");
    }

    #[test]
    fn test_subscript_and_slice() {
        assert_eq!(roundtrip("x = a[:2]"), "x = a[:2]");
        assert_eq!(roundtrip("x = a[1:2:3]"), "x = a[1:2:3]");
        assert_eq!(roundtrip("x = a[1, 2]"), "x = a[1, 2]");
        assert_eq!(roundtrip("x = sys.version_info[:2] < (3, 3)"), "x = sys.version_info[:2] < (3, 3)");
    }

    #[test]
    fn test_call_forms() {
        assert_eq!(roundtrip("f(a, *b, k=1, **kw)"), "f(a, *b, k=1, **kw)");
        assert_eq!(roundtrip("obj.method(1)"), "obj.method(1)");
    }

    #[test]
    fn test_def_with_defaults_and_star() {
        assert_eq!(
            roundtrip("def f(a, b=1, *args, c, d=2, **kw):\n    pass"),
            "def f(a, b=1, *args, c, d=2, **kw):\n    pass"
        );
        assert_eq!(roundtrip("def f(a, /, b):\n    pass"), "def f(a, /, b):\n    pass");
    }

    #[test]
    fn test_elif_collapse() {
        assert_eq!(
            roundtrip("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3"),
            "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3"
        );
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(roundtrip("x = [i for i in y if i]"), "x = [i for i in y if i]");
        assert_eq!(roundtrip("x = {k: v for k, v in y}"), "x = {k: v for k, v in y}");
        assert_eq!(roundtrip("x = {i for i in y}"), "x = {i for i in y}");
    }

    #[test]
    fn test_fstring() {
        assert_eq!(roundtrip("x = f'a{b}c'"), "x = f'a{b}c'");
        assert_eq!(roundtrip("x = f'{v!r:>10}'"), "x = f'{v!r:>10}'");
    }

    #[test]
    fn test_lambda_and_ifexp() {
        assert_eq!(roundtrip("f = lambda x: x + 1"), "f = lambda x: x + 1");
        assert_eq!(roundtrip("x = a if b else c"), "x = a if b else c");
    }

    #[test]
    fn test_integer_attribute_space() {
        assert_eq!(roundtrip("x = 1 .to_bytes"), "x = 1 .to_bytes");
    }

    #[test]
    fn test_stable_serialization() {
        let src = "import os\n\n\ndef f(x):\n    return os.path.join(x, 'y')\n";
        let once = roundtrip(src);
        let twice = roundtrip(&once);
        assert_eq!(once, twice);
    }
}
