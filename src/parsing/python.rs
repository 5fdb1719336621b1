//! Python parser.
//!
//! Extraction is purely AST-driven, so identifiers inside strings, comments
//! or literal collections are never mistaken for declarations. Docstrings
//! are the first string expression of a definition body, per the language's
//! own convention.

use crate::error::{ParseError, ParseResult};
use crate::parsing::parser::{
    BaseRef, BindingSource, LanguageParser, MODULE_SCOPE, ParsedFile, TypeBinding,
    check_recursion_depth, end_line, flatten_signature, node_text, start_line, text_before,
};
use crate::parsing::skeleton::{Elision, Skeleton, render_preserving};
use crate::parsing::{Language, NewImport, NewMethodCall};
use crate::symbol::NewSymbol;
use crate::types::{LineSpan, SymbolKind};
use tree_sitter::{Node, Parser};

/// Tracks the lexical nesting during extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ScopeKind {
    Class,
    Function,
}

struct Scope {
    kind: ScopeKind,
    name: String,
}

pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> ParseResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| ParseError::ParserInit {
                language: "Python".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, code: &str) -> ParseResult<tree_sitter::Tree> {
        let tree = self
            .parser
            .parse(code, None)
            .ok_or_else(|| ParseError::Syntax {
                language: "Python".to_string(),
            })?;
        if tree.root_node().has_error() {
            return Err(ParseError::Syntax {
                language: "Python".to_string(),
            });
        }
        Ok(tree)
    }

    fn extract(
        &self,
        node: Node,
        code: &str,
        out: &mut ParsedFile,
        scopes: &mut Vec<Scope>,
        depth: usize,
    ) {
        if !check_recursion_depth(depth, node) {
            return;
        }

        match node.kind() {
            "function_definition" => {
                self.handle_function(node, code, out, scopes, depth);
                return;
            }
            "class_definition" => {
                self.handle_class(node, code, out, scopes, depth);
                return;
            }
            "decorated_definition" => {
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.extract(definition, code, out, scopes, depth + 1);
                }
                return;
            }
            "import_statement" => {
                self.handle_import(node, code, out);
                return;
            }
            "import_from_statement" => {
                self.handle_import_from(node, code, out);
                return;
            }
            "assignment" => {
                self.handle_assignment(node, code, out, scopes);
                // Fall through to scan the right-hand side for call sites.
            }
            "call" => {
                self.handle_call(node, code, out, scopes);
                // Chained and nested calls live in the children.
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.extract(child, code, out, scopes, depth + 1);
        }
    }

    fn handle_function(
        &self,
        node: Node,
        code: &str,
        out: &mut ParsedFile,
        scopes: &mut Vec<Scope>,
        depth: usize,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, code).to_string();
        let in_class = matches!(scopes.last(), Some(s) if s.kind == ScopeKind::Class);
        let kind = if in_class {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };

        let body = node.child_by_field_name("body");
        let signature_stop = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
        let signature = flatten_signature(text_before(node, signature_stop, code));

        let mut symbol = NewSymbol::new(
            name.clone(),
            qualify(scopes, &name),
            kind,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(signature);

        if let Some(doc) = body.and_then(|b| docstring(b, code)) {
            symbol = symbol.with_doc(doc);
        }
        if in_class {
            if let Some(class_scope) = scopes.last() {
                symbol = symbol.with_parent(class_scope.name.clone());
            }
        }
        out.symbols.push(symbol);

        // Parameter and return-type bindings, scoped to this function.
        if let Some(params) = node.child_by_field_name("parameters") {
            self.collect_parameter_bindings(params, code, &name, in_class, scopes, out);
        }
        if let Some(return_type) = node.child_by_field_name("return_type") {
            out.bindings.push(TypeBinding {
                scope: name.clone(),
                name: "return".to_string(),
                type_name: node_text(return_type, code).to_string(),
                source: BindingSource::Return,
                line: start_line(return_type),
            });
        }

        scopes.push(Scope {
            kind: ScopeKind::Function,
            name,
        });
        if let Some(body) = body {
            let mut cursor = body.walk();
            for child in body.named_children(&mut cursor) {
                self.extract(child, code, out, scopes, depth + 1);
            }
        }
        scopes.pop();
    }

    fn collect_parameter_bindings(
        &self,
        params: Node,
        code: &str,
        function_name: &str,
        in_class: bool,
        scopes: &[Scope],
        out: &mut ParsedFile,
    ) {
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            match param.kind() {
                "typed_parameter" | "typed_default_parameter" => {
                    let name = param
                        .child_by_field_name("name")
                        .or_else(|| param.named_child(0))
                        .map(|n| node_text(n, code).to_string());
                    let type_name = param
                        .child_by_field_name("type")
                        .map(|n| node_text(n, code).to_string());
                    if let (Some(name), Some(type_name)) = (name, type_name) {
                        out.bindings.push(TypeBinding {
                            scope: function_name.to_string(),
                            name,
                            type_name,
                            source: BindingSource::Parameter,
                            line: start_line(param),
                        });
                    }
                }
                "identifier" => {
                    // `self` carries the enclosing class as its declared type.
                    if in_class && node_text(param, code) == "self" {
                        if let Some(class_scope) = scopes.last() {
                            out.bindings.push(TypeBinding {
                                scope: function_name.to_string(),
                                name: "self".to_string(),
                                type_name: class_scope.name.clone(),
                                source: BindingSource::Annotation,
                                line: start_line(param),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_class(
        &self,
        node: Node,
        code: &str,
        out: &mut ParsedFile,
        scopes: &mut Vec<Scope>,
        depth: usize,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, code).to_string();
        let body = node.child_by_field_name("body");
        let signature_stop = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
        let signature = flatten_signature(text_before(node, signature_stop, code));

        let mut symbol = NewSymbol::new(
            name.clone(),
            qualify(scopes, &name),
            SymbolKind::Class,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(signature);
        if let Some(doc) = body.and_then(|b| docstring(b, code)) {
            symbol = symbol.with_doc(doc);
        }
        out.symbols.push(symbol);

        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                let base_name = match base.kind() {
                    "identifier" | "attribute" => node_text(base, code).to_string(),
                    // Generic[T] and similar: the subscripted value is the base.
                    "subscript" => base
                        .child_by_field_name("value")
                        .map(|v| node_text(v, code).to_string())
                        .unwrap_or_default(),
                    // metaclass=... and other keyword arguments are not bases.
                    _ => continue,
                };
                if !base_name.is_empty() {
                    out.bases.push(BaseRef {
                        class_name: name.clone(),
                        line: start_line(node),
                        base_name,
                    });
                }
            }
        }

        scopes.push(Scope {
            kind: ScopeKind::Class,
            name,
        });
        if let Some(body) = body {
            let mut cursor = body.walk();
            for child in body.named_children(&mut cursor) {
                self.extract(child, code, out, scopes, depth + 1);
            }
        }
        scopes.pop();
    }

    fn handle_import(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let line = start_line(node);
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    out.imports
                        .push(NewImport::module(node_text(child, code), line));
                }
                "aliased_import" => {
                    let module = child
                        .child_by_field_name("name")
                        .map(|n| node_text(n, code).to_string())
                        .unwrap_or_default();
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| node_text(n, code).to_string());
                    let mut import = NewImport::module(module, line);
                    if let Some(alias) = alias {
                        import = import.with_alias(alias);
                    }
                    out.imports.push(import);
                }
                _ => {}
            }
        }
    }

    fn handle_import_from(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let line = start_line(node);
        let module = node
            .child_by_field_name("module_name")
            .map(|n| node_text(n, code).to_string())
            .unwrap_or_default();

        let mut names = Vec::new();
        let mut alias = None;
        let mut is_glob = false;

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            // The module_name field also matches dotted_name; skip it.
            if Some(child) == node.child_by_field_name("module_name") {
                continue;
            }
            match child.kind() {
                "dotted_name" | "identifier" => {
                    names.push(node_text(child, code).to_string());
                }
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        names.push(node_text(name, code).to_string());
                    }
                    if let Some(alias_node) = child.child_by_field_name("alias") {
                        alias = Some(node_text(alias_node, code).to_string());
                    }
                }
                "wildcard_import" => is_glob = true,
                _ => {}
            }
        }

        let mut import = NewImport::module(module, line).with_names(names);
        if let Some(alias) = alias {
            import = import.with_alias(alias);
        }
        if is_glob {
            import = import.glob();
        }
        out.imports.push(import);
    }

    fn handle_assignment(&self, node: Node, code: &str, out: &mut ParsedFile, scopes: &[Scope]) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = node_text(left, code).to_string();
        let scope = enclosing_function(scopes);

        // Module-scope assignments are indexed as variables.
        if scopes.is_empty() {
            out.symbols.push(
                NewSymbol::new(
                    name.clone(),
                    name.clone(),
                    SymbolKind::Variable,
                    LineSpan::new(start_line(node), end_line(node)),
                )
                .with_signature(flatten_signature(node_text(node, code))),
            );
        }

        if let Some(type_node) = node.child_by_field_name("type") {
            out.bindings.push(TypeBinding {
                scope: scope.clone(),
                name: name.clone(),
                type_name: node_text(type_node, code).to_string(),
                source: BindingSource::Annotation,
                line: start_line(node),
            });
        }

        // `x = T(...)` records a constructor binding; whether `T` really is
        // a class is the type tracker's problem.
        if let Some(right) = node.child_by_field_name("right") {
            if right.kind() == "call" {
                if let Some(function) = right.child_by_field_name("function") {
                    if matches!(function.kind(), "identifier" | "attribute") {
                        out.bindings.push(TypeBinding {
                            scope,
                            name,
                            type_name: node_text(function, code).to_string(),
                            source: BindingSource::Constructor,
                            line: start_line(node),
                        });
                    }
                }
            }
        }
    }

    fn handle_call(&self, node: Node, code: &str, out: &mut ParsedFile, scopes: &[Scope]) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let caller = enclosing_function(scopes);
        let line = start_line(node);
        let column = node.start_position().column as u32;

        match function.kind() {
            "attribute" => {
                let receiver = function
                    .child_by_field_name("object")
                    .map(|n| node_text(n, code).to_string());
                let method = function
                    .child_by_field_name("attribute")
                    .map(|n| node_text(n, code).to_string());
                if let (Some(receiver), Some(method)) = (receiver, method) {
                    out.calls.push(
                        NewMethodCall::new(caller, method, line, column).with_receiver(receiver),
                    );
                }
            }
            "identifier" => {
                out.calls.push(NewMethodCall::new(
                    caller,
                    node_text(function, code),
                    line,
                    column,
                ));
            }
            _ => {}
        }
    }

    fn collect_elisions(&self, node: Node, code: &str, elisions: &mut Vec<Elision>, depth: usize) {
        if !check_recursion_depth(depth, node) {
            return;
        }
        if node.kind() == "function_definition" {
            if let Some(body) = node.child_by_field_name("body") {
                elisions.push(python_body_elision(body, code));
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_elisions(child, code, elisions, depth + 1);
        }
    }
}

/// Elide a function body down to its docstring (when present) plus `...`.
fn python_body_elision(body: Node, code: &str) -> Elision {
    let indent = " ".repeat(body.start_position().column);

    if let Some(first) = body.named_child(0) {
        if first.kind() == "expression_statement"
            && first
                .named_child(0)
                .is_some_and(|n| n.kind() == "string")
            && body.named_child_count() > 1
        {
            return Elision {
                start_byte: first.end_byte(),
                end_byte: body.end_byte(),
                placeholder: format!("\n{indent}..."),
            };
        }
    }

    Elision {
        start_byte: body.start_byte(),
        end_byte: body.end_byte(),
        placeholder: "...".to_string(),
    }
}

/// First string expression of a definition body, with quotes stripped.
fn docstring(body: Node, code: &str) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = node_text(string, code);
    let stripped = raw
        .trim_start_matches(['r', 'b', 'u', 'f', 'R', 'B', 'U', 'F'])
        .trim_start_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_start_matches('"')
        .trim_start_matches('\'')
        .trim_end_matches("\"\"\"")
        .trim_end_matches("'''")
        .trim_end_matches('"')
        .trim_end_matches('\'');
    let cleaned = stripped.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn qualify(scopes: &[Scope], name: &str) -> String {
    if scopes.is_empty() {
        return name.to_string();
    }
    let mut path = String::new();
    for scope in scopes {
        path.push_str(&scope.name);
        path.push('.');
    }
    path.push_str(name);
    path
}

fn enclosing_function(scopes: &[Scope]) -> String {
    scopes
        .iter()
        .rev()
        .find(|s| s.kind == ScopeKind::Function)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| MODULE_SCOPE.to_string())
}

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn parse(&mut self, code: &str) -> ParseResult<ParsedFile> {
        let tree = self.parse_tree(code)?;
        let mut out = ParsedFile::default();
        let mut scopes = Vec::new();
        let root = tree.root_node();
        let mut cursor = root.walk();
        let children: Vec<Node> = root.named_children(&mut cursor).collect();
        for child in children {
            self.extract(child, code, &mut out, &mut scopes, 0);
        }
        Ok(out)
    }

    fn skeletonize_preserving(
        &mut self,
        code: &str,
        preserve: &[crate::types::LineSpan],
    ) -> ParseResult<Skeleton> {
        let tree = self.parse_tree(code)?;
        let mut elisions = Vec::new();
        self.collect_elisions(tree.root_node(), code, &mut elisions, 0);
        Ok(render_preserving(code, elisions, preserve))
    }
}
