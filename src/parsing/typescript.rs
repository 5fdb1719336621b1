//! TypeScript parser.
//!
//! Mirrors the JavaScript extraction and additionally reads interfaces,
//! enums and explicit type annotations, which give the type tracker its
//! highest-confidence bindings.

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

pub struct TypeScriptParser {
    parser: Parser,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScopeKind {
    Class,
    Function,
}

struct Scope {
    kind: ScopeKind,
    name: String,
}

impl TypeScriptParser {
    pub fn new() -> ParseResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .map_err(|e| ParseError::ParserInit {
                language: "TypeScript".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, code: &str) -> ParseResult<tree_sitter::Tree> {
        let tree = self
            .parser
            .parse(code, None)
            .ok_or_else(|| ParseError::Syntax {
                language: "TypeScript".to_string(),
            })?;
        if tree.root_node().has_error() {
            return Err(ParseError::Syntax {
                language: "TypeScript".to_string(),
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
            "function_declaration" | "generator_function_declaration" => {
                self.handle_function(node, code, out, scopes, depth);
                return;
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.handle_class(node, code, out, scopes, depth);
                return;
            }
            "interface_declaration" => {
                self.handle_interface(node, code, out, scopes);
                return;
            }
            "enum_declaration" => {
                self.handle_enum(node, code, out, scopes);
                return;
            }
            "method_definition" => {
                self.handle_method(node, code, out, scopes, depth);
                return;
            }
            "lexical_declaration" | "variable_declaration" => {
                self.handle_variable_declaration(node, code, out, scopes, depth);
                return;
            }
            "import_statement" => {
                self.handle_import(node, code, out);
                return;
            }
            "export_statement" => {
                if let Some(declaration) = node.child_by_field_name("declaration") {
                    self.extract(declaration, code, out, scopes, depth + 1);
                    return;
                }
            }
            "call_expression" => {
                self.handle_call(node, code, out, scopes);
            }
            "new_expression" => {
                if let Some(constructor) = node.child_by_field_name("constructor") {
                    if constructor.kind() == "identifier" {
                        out.calls.push(NewMethodCall::new(
                            enclosing_function(scopes),
                            node_text(constructor, code),
                            start_line(node),
                            node.start_position().column as u32,
                        ));
                    }
                }
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
        let body = node.child_by_field_name("body");
        let signature_stop = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());

        let mut symbol = NewSymbol::new(
            name.clone(),
            qualify(scopes, &name),
            SymbolKind::Function,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(flatten_signature(text_before(node, signature_stop, code)));
        if let Some(doc) = doc_comment_before(node, code) {
            symbol = symbol.with_doc(doc);
        }
        out.symbols.push(symbol);

        self.collect_parameter_bindings(node, code, &name, out);
        self.collect_return_binding(node, code, &name, out);

        scopes.push(Scope {
            kind: ScopeKind::Function,
            name,
        });
        if let Some(body) = body {
            self.extract_children(body, code, out, scopes, depth);
        }
        scopes.pop();
    }

    fn collect_parameter_bindings(
        &self,
        function: Node,
        code: &str,
        function_name: &str,
        out: &mut ParsedFile,
    ) {
        let Some(params) = function.child_by_field_name("parameters") else {
            return;
        };
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            if !matches!(param.kind(), "required_parameter" | "optional_parameter") {
                continue;
            }
            let pattern = param.child_by_field_name("pattern");
            let annotation = param
                .child_by_field_name("type")
                .and_then(|t| t.named_child(0));
            if let (Some(pattern), Some(type_node)) = (pattern, annotation) {
                if pattern.kind() == "identifier" {
                    out.bindings.push(TypeBinding {
                        scope: function_name.to_string(),
                        name: node_text(pattern, code).to_string(),
                        type_name: node_text(type_node, code).to_string(),
                        source: BindingSource::Parameter,
                        line: start_line(param),
                    });
                }
            }
        }
    }

    fn collect_return_binding(
        &self,
        function: Node,
        code: &str,
        function_name: &str,
        out: &mut ParsedFile,
    ) {
        if let Some(type_node) = function
            .child_by_field_name("return_type")
            .and_then(|t| t.named_child(0))
        {
            out.bindings.push(TypeBinding {
                scope: function_name.to_string(),
                name: "return".to_string(),
                type_name: node_text(type_node, code).to_string(),
                source: BindingSource::Return,
                line: start_line(type_node),
            });
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

        let mut symbol = NewSymbol::new(
            name.clone(),
            qualify(scopes, &name),
            SymbolKind::Class,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(flatten_signature(text_before(node, signature_stop, code)));
        if let Some(doc) = doc_comment_before(node, code) {
            symbol = symbol.with_doc(doc);
        }
        out.symbols.push(symbol);

        // extends and implements both create inheritance edges.
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "class_heritage" {
                collect_heritage_names(child, code, &name, start_line(node), out);
            }
        }

        scopes.push(Scope {
            kind: ScopeKind::Class,
            name,
        });
        if let Some(body) = body {
            self.extract_children(body, code, out, scopes, depth);
        }
        scopes.pop();
    }

    fn handle_interface(&self, node: Node, code: &str, out: &mut ParsedFile, scopes: &[Scope]) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, code).to_string();
        let body = node.child_by_field_name("body");
        let signature_stop = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());

        let mut symbol = NewSymbol::new(
            name.clone(),
            qualify(scopes, &name),
            SymbolKind::Interface,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(flatten_signature(text_before(node, signature_stop, code)));
        if let Some(doc) = doc_comment_before(node, code) {
            symbol = symbol.with_doc(doc);
        }
        out.symbols.push(symbol);

        // `interface A extends B, C`.
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind().starts_with("extends") {
                collect_heritage_names(child, code, &name, start_line(node), out);
            }
        }

        // Method signatures become method symbols under the interface.
        if let Some(body) = body {
            let mut cursor = body.walk();
            for member in body.named_children(&mut cursor) {
                if member.kind() != "method_signature" {
                    continue;
                }
                let Some(method_name) = member.child_by_field_name("name") else {
                    continue;
                };
                let method_name = node_text(method_name, code).to_string();
                out.symbols.push(
                    NewSymbol::new(
                        method_name.clone(),
                        format!("{name}.{method_name}"),
                        SymbolKind::Method,
                        LineSpan::new(start_line(member), end_line(member)),
                    )
                    .with_signature(flatten_signature(node_text(member, code)))
                    .with_parent(name.clone()),
                );
            }
        }
    }

    fn handle_enum(&self, node: Node, code: &str, out: &mut ParsedFile, scopes: &[Scope]) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, code).to_string();
        let body = node.child_by_field_name("body");
        let signature_stop = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());

        let mut symbol = NewSymbol::new(
            name.clone(),
            qualify(scopes, &name),
            SymbolKind::Enum,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(flatten_signature(text_before(node, signature_stop, code)));
        if let Some(doc) = doc_comment_before(node, code) {
            symbol = symbol.with_doc(doc);
        }
        out.symbols.push(symbol);
    }

    fn handle_method(
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

        let mut symbol = NewSymbol::new(
            name.clone(),
            qualify(scopes, &name),
            SymbolKind::Method,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(flatten_signature(text_before(node, signature_stop, code)));
        if let Some(doc) = doc_comment_before(node, code) {
            symbol = symbol.with_doc(doc);
        }
        if let Some(class_scope) = scopes.iter().rev().find(|s| s.kind == ScopeKind::Class) {
            symbol = symbol.with_parent(class_scope.name.clone());
            out.bindings.push(TypeBinding {
                scope: name.clone(),
                name: "this".to_string(),
                type_name: class_scope.name.clone(),
                source: BindingSource::Annotation,
                line: start_line(node),
            });
        }
        out.symbols.push(symbol);

        self.collect_parameter_bindings(node, code, &name, out);
        self.collect_return_binding(node, code, &name, out);

        scopes.push(Scope {
            kind: ScopeKind::Function,
            name,
        });
        if let Some(body) = body {
            self.extract_children(body, code, out, scopes, depth);
        }
        scopes.pop();
    }

    fn handle_variable_declaration(
        &self,
        node: Node,
        code: &str,
        out: &mut ParsedFile,
        scopes: &mut Vec<Scope>,
        depth: usize,
    ) {
        let at_module = scopes.is_empty();
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "variable_declarator")
            .collect();

        for declarator in declarators {
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            if name_node.kind() != "identifier" {
                continue;
            }
            let name = node_text(name_node, code).to_string();
            let value = declarator.child_by_field_name("value");

            // `const store: Database = ...` is the strongest binding we get.
            if let Some(type_node) = declarator
                .child_by_field_name("type")
                .and_then(|t| t.named_child(0))
            {
                out.bindings.push(TypeBinding {
                    scope: enclosing_function(scopes),
                    name: name.clone(),
                    type_name: node_text(type_node, code).to_string(),
                    source: BindingSource::Annotation,
                    line: start_line(declarator),
                });
            }

            match value.map(|v| v.kind()) {
                Some("arrow_function") | Some("function_expression") | Some("function") => {
                    let value = value.unwrap();
                    let body = value.child_by_field_name("body");
                    let signature_stop = body
                        .filter(|b| b.kind() == "statement_block")
                        .map(|b| b.start_byte())
                        .unwrap_or(value.start_byte());
                    let mut symbol = NewSymbol::new(
                        name.clone(),
                        qualify(scopes, &name),
                        SymbolKind::Function,
                        LineSpan::new(start_line(node), end_line(node)),
                    )
                    .with_signature(flatten_signature(text_before(
                        node,
                        signature_stop.max(node.start_byte()),
                        code,
                    )));
                    if let Some(doc) = doc_comment_before(node, code) {
                        symbol = symbol.with_doc(doc);
                    }
                    out.symbols.push(symbol);

                    self.collect_parameter_bindings(value, code, &name, out);
                    self.collect_return_binding(value, code, &name, out);

                    scopes.push(Scope {
                        kind: ScopeKind::Function,
                        name,
                    });
                    if let Some(body) = body {
                        self.extract(body, code, out, scopes, depth + 1);
                    }
                    scopes.pop();
                }
                Some("new_expression") => {
                    if at_module {
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
                    let value = value.unwrap();
                    if let Some(constructor) = value.child_by_field_name("constructor") {
                        if matches!(constructor.kind(), "identifier" | "member_expression") {
                            out.bindings.push(TypeBinding {
                                scope: enclosing_function(scopes),
                                name,
                                type_name: node_text(constructor, code).to_string(),
                                source: BindingSource::Constructor,
                                line: start_line(declarator),
                            });
                        }
                    }
                    self.extract(value, code, out, scopes, depth + 1);
                }
                _ => {
                    if at_module {
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
                    if let Some(value) = value {
                        self.extract(value, code, out, scopes, depth + 1);
                    }
                }
            }
        }
    }

    fn handle_import(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let line = start_line(node);
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let module_path = node_text(source, code).trim_matches(['"', '\'']).to_string();

        let mut names = Vec::new();
        let mut alias = None;

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "import_clause" {
                continue;
            }
            let mut inner = child.walk();
            for part in child.named_children(&mut inner) {
                match part.kind() {
                    "identifier" => names.push(node_text(part, code).to_string()),
                    "named_imports" => {
                        let mut specs = part.walk();
                        for spec in part.named_children(&mut specs) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            if let Some(name) = spec.child_by_field_name("name") {
                                names.push(node_text(name, code).to_string());
                            }
                            if let Some(alias_node) = spec.child_by_field_name("alias") {
                                alias = Some(node_text(alias_node, code).to_string());
                            }
                        }
                    }
                    "namespace_import" => {
                        if let Some(ns) = part.named_child(0) {
                            alias = Some(node_text(ns, code).to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut import = NewImport::module(module_path, line).with_names(names);
        if let Some(alias) = alias {
            import = import.with_alias(alias);
        }
        out.imports.push(import);
    }

    fn handle_call(&self, node: Node, code: &str, out: &mut ParsedFile, scopes: &[Scope]) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let caller = enclosing_function(scopes);
        let line = start_line(node);
        let column = node.start_position().column as u32;

        match function.kind() {
            "member_expression" => {
                let receiver = function
                    .child_by_field_name("object")
                    .map(|n| node_text(n, code).to_string());
                let method = function
                    .child_by_field_name("property")
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

    fn extract_children(
        &self,
        node: Node,
        code: &str,
        out: &mut ParsedFile,
        scopes: &mut Vec<Scope>,
        depth: usize,
    ) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.extract(child, code, out, scopes, depth + 1);
        }
    }

    fn collect_elisions(&self, node: Node, code: &str, elisions: &mut Vec<Elision>, depth: usize) {
        if !check_recursion_depth(depth, node) {
            return;
        }
        let body_holder = matches!(
            node.kind(),
            "function_declaration"
                | "generator_function_declaration"
                | "function_expression"
                | "function"
                | "arrow_function"
                | "method_definition"
        );
        if body_holder {
            if let Some(body) = node.child_by_field_name("body") {
                if body.kind() == "statement_block" {
                    elisions.push(Elision {
                        start_byte: body.start_byte(),
                        end_byte: body.end_byte(),
                        placeholder: "{ ... }".to_string(),
                    });
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_elisions(child, code, elisions, depth + 1);
        }
    }
}

/// Pull every type/identifier name out of a heritage clause
/// (`extends X`, `implements Y, Z`), preserving source order. Base order is
/// load-bearing for linearization.
fn collect_heritage_names(
    clause: Node,
    code: &str,
    class_name: &str,
    class_line: u32,
    out: &mut ParsedFile,
) {
    match clause.kind() {
        "identifier" | "type_identifier" => {
            out.bases.push(BaseRef {
                class_name: class_name.to_string(),
                line: class_line,
                base_name: node_text(clause, code).to_string(),
            });
        }
        // Don't descend into type arguments: `Repo<User>` extends Repo,
        // not User.
        "type_arguments" => {}
        _ => {
            let mut cursor = clause.walk();
            for child in clause.named_children(&mut cursor) {
                collect_heritage_names(child, code, class_name, class_line, out);
            }
        }
    }
}

/// Closest preceding JSDoc-style comment, with comment markers stripped.
fn doc_comment_before(node: Node, code: &str) -> Option<String> {
    let anchor = match node.parent() {
        Some(parent) if parent.kind() == "export_statement" => parent,
        _ => node,
    };
    let prev = anchor.prev_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    let raw = node_text(prev, code);
    if !raw.starts_with("/**") {
        return None;
    }
    let cleaned: Vec<&str> = raw
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n"))
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

impl LanguageParser for TypeScriptParser {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn parse(&mut self, code: &str) -> ParseResult<ParsedFile> {
        let tree = self.parse_tree(code)?;
        let mut out = ParsedFile::default();
        let mut scopes = Vec::new();
        self.extract_children(tree.root_node(), code, &mut out, &mut scopes, 0);
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
