//! Go parser.
//!
//! Structs map to class symbols and interfaces to interface symbols.
//! Embedded fields become inheritance edges, which is as close as Go gets
//! to a base class and is what method-set lookup wants.

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

pub struct GoParser {
    parser: Parser,
}

impl GoParser {
    pub fn new() -> ParseResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| ParseError::ParserInit {
                language: "Go".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, code: &str) -> ParseResult<tree_sitter::Tree> {
        let tree = self
            .parser
            .parse(code, None)
            .ok_or_else(|| ParseError::Syntax {
                language: "Go".to_string(),
            })?;
        if tree.root_node().has_error() {
            return Err(ParseError::Syntax {
                language: "Go".to_string(),
            });
        }
        Ok(tree)
    }

    fn extract_top_level(&self, root: Node, code: &str, out: &mut ParsedFile) {
        let mut cursor = root.walk();
        let children: Vec<Node> = root.named_children(&mut cursor).collect();
        for node in children {
            match node.kind() {
                "function_declaration" => self.handle_function(node, code, out),
                "method_declaration" => self.handle_method(node, code, out),
                "type_declaration" => self.handle_type_declaration(node, code, out),
                "const_declaration" | "var_declaration" => {
                    self.handle_value_declaration(node, code, out)
                }
                "import_declaration" => self.handle_import_declaration(node, code, out),
                _ => {}
            }
        }
    }

    fn handle_function(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, code).to_string();
        let body = node.child_by_field_name("body");
        let signature_stop = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());

        let mut symbol = NewSymbol::new(
            name.clone(),
            name.clone(),
            SymbolKind::Function,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(flatten_signature(text_before(node, signature_stop, code)));
        if let Some(doc) = doc_comment_before(node, code) {
            symbol = symbol.with_doc(doc);
        }
        out.symbols.push(symbol);

        self.collect_parameter_bindings(node, code, &name, out);
        if let Some(body) = body {
            self.scan_body(body, code, &name, out, 0);
        }
    }

    fn handle_method(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, code).to_string();
        let receiver_type = node
            .child_by_field_name("receiver")
            .and_then(|r| receiver_type_name(r, code));
        let body = node.child_by_field_name("body");
        let signature_stop = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());

        let qualified = match &receiver_type {
            Some(recv) => format!("{recv}.{name}"),
            None => name.clone(),
        };
        let mut symbol = NewSymbol::new(
            name.clone(),
            qualified,
            SymbolKind::Method,
            LineSpan::new(start_line(node), end_line(node)),
        )
        .with_signature(flatten_signature(text_before(node, signature_stop, code)));
        if let Some(doc) = doc_comment_before(node, code) {
            symbol = symbol.with_doc(doc);
        }
        if let Some(recv) = &receiver_type {
            symbol = symbol.with_parent(recv.clone());
        }
        out.symbols.push(symbol);

        // The receiver variable is annotated with the receiver type.
        if let (Some(receiver), Some(recv_type)) =
            (node.child_by_field_name("receiver"), receiver_type)
        {
            if let Some(var_name) = receiver_var_name(receiver, code) {
                out.bindings.push(TypeBinding {
                    scope: name.clone(),
                    name: var_name,
                    type_name: recv_type,
                    source: BindingSource::Annotation,
                    line: start_line(node),
                });
            }
        }

        self.collect_parameter_bindings(node, code, &name, out);
        if let Some(body) = body {
            self.scan_body(body, code, &name, out, 0);
        }
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
            if param.kind() != "parameter_declaration" {
                continue;
            }
            let Some(type_node) = param.child_by_field_name("type") else {
                continue;
            };
            let type_name = bare_type_name(type_node, code);
            if type_name.is_empty() {
                continue;
            }
            let mut names = param.walk();
            for part in param.named_children(&mut names) {
                if part.kind() == "identifier" {
                    out.bindings.push(TypeBinding {
                        scope: function_name.to_string(),
                        name: node_text(part, code).to_string(),
                        type_name: type_name.clone(),
                        source: BindingSource::Parameter,
                        line: start_line(param),
                    });
                }
            }
        }

        if let Some(result) = function.child_by_field_name("result") {
            let type_name = bare_type_name(result, code);
            if !type_name.is_empty() {
                out.bindings.push(TypeBinding {
                    scope: function_name.to_string(),
                    name: "return".to_string(),
                    type_name,
                    source: BindingSource::Return,
                    line: start_line(result),
                });
            }
        }
    }

    fn handle_type_declaration(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let mut cursor = node.walk();
        let specs: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|n| matches!(n.kind(), "type_spec" | "type_alias"))
            .collect();
        let single = specs.len() == 1;

        for spec in specs {
            let Some(name_node) = spec.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, code).to_string();
            let type_node = spec.child_by_field_name("type");

            let (kind, body) = match type_node.map(|t| t.kind()) {
                Some("struct_type") => (
                    SymbolKind::Class,
                    type_node.and_then(|t| t.named_child(0)),
                ),
                Some("interface_type") => (SymbolKind::Interface, type_node),
                _ => (SymbolKind::Class, None),
            };

            // Span covers the whole declaration when it holds one spec, so
            // the preceding doc comment and `type` keyword stay attached.
            let span_node = if single { node } else { spec };
            let signature_stop = body
                .map(|b| b.start_byte())
                .unwrap_or(spec.end_byte());

            let mut symbol = NewSymbol::new(
                name.clone(),
                name.clone(),
                kind,
                LineSpan::new(start_line(span_node), end_line(span_node)),
            )
            .with_signature(flatten_signature(text_before(span_node, signature_stop, code)));
            if let Some(doc) = doc_comment_before(node, code) {
                symbol = symbol.with_doc(doc);
            }
            out.symbols.push(symbol);

            match type_node.map(|t| t.kind()) {
                Some("struct_type") => {
                    self.collect_embedded_struct_fields(type_node.unwrap(), code, &name, out)
                }
                Some("interface_type") => {
                    self.collect_interface_members(type_node.unwrap(), code, &name, out)
                }
                _ => {}
            }
        }
    }

    /// Embedded (anonymous) struct fields become inheritance edges.
    fn collect_embedded_struct_fields(
        &self,
        struct_type: Node,
        code: &str,
        class_name: &str,
        out: &mut ParsedFile,
    ) {
        let Some(field_list) = struct_type.named_child(0) else {
            return;
        };
        let mut cursor = field_list.walk();
        for field in field_list.named_children(&mut cursor) {
            if field.kind() != "field_declaration" {
                continue;
            }
            let has_name = field
                .child_by_field_name("name")
                .is_some();
            if has_name {
                continue;
            }
            let Some(type_node) = field.child_by_field_name("type") else {
                continue;
            };
            let base_name = bare_type_name(type_node, code);
            if !base_name.is_empty() {
                out.bases.push(BaseRef {
                    class_name: class_name.to_string(),
                    line: start_line(field),
                    base_name,
                });
            }
        }
    }

    /// Interface method elements become method symbols; embedded interfaces
    /// become inheritance edges.
    fn collect_interface_members(
        &self,
        interface_type: Node,
        code: &str,
        interface_name: &str,
        out: &mut ParsedFile,
    ) {
        let mut cursor = interface_type.walk();
        for member in interface_type.named_children(&mut cursor) {
            match member.kind() {
                "method_elem" | "method_spec" => {
                    let Some(name_node) = member.child_by_field_name("name") else {
                        continue;
                    };
                    let method_name = node_text(name_node, code).to_string();
                    out.symbols.push(
                        NewSymbol::new(
                            method_name.clone(),
                            format!("{interface_name}.{method_name}"),
                            SymbolKind::Method,
                            LineSpan::new(start_line(member), end_line(member)),
                        )
                        .with_signature(flatten_signature(node_text(member, code)))
                        .with_parent(interface_name),
                    );
                }
                "type_elem" | "type_identifier" | "qualified_type" => {
                    let base_name = bare_type_name(member, code);
                    if !base_name.is_empty() {
                        out.bases.push(BaseRef {
                            class_name: interface_name.to_string(),
                            line: start_line(member),
                            base_name,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_value_declaration(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let mut cursor = node.walk();
        for spec in node.named_children(&mut cursor) {
            if !matches!(spec.kind(), "const_spec" | "var_spec") {
                continue;
            }
            let type_name = spec
                .child_by_field_name("type")
                .map(|t| bare_type_name(t, code));

            let mut names = spec.walk();
            for part in spec.named_children(&mut names) {
                if part.kind() != "identifier" {
                    // Identifiers after the first non-name child are values.
                    break;
                }
                let name = node_text(part, code).to_string();
                out.symbols.push(
                    NewSymbol::new(
                        name.clone(),
                        name.clone(),
                        SymbolKind::Variable,
                        LineSpan::new(start_line(spec), end_line(spec)),
                    )
                    .with_signature(flatten_signature(node_text(spec, code))),
                );
                if let Some(type_name) = &type_name {
                    if !type_name.is_empty() {
                        out.bindings.push(TypeBinding {
                            scope: MODULE_SCOPE.to_string(),
                            name,
                            type_name: type_name.clone(),
                            source: BindingSource::Annotation,
                            line: start_line(spec),
                        });
                    }
                }
            }
        }
    }

    fn handle_import_declaration(&self, node: Node, code: &str, out: &mut ParsedFile) {
        let mut specs = Vec::new();
        collect_nodes_of_kind(node, "import_spec", &mut specs);
        for spec in specs {
            let Some(path_node) = spec.child_by_field_name("path") else {
                continue;
            };
            let module_path = node_text(path_node, code).trim_matches('"').to_string();
            let mut import = NewImport::module(module_path, start_line(spec));
            if let Some(alias) = spec.child_by_field_name("name") {
                if alias.kind() == "package_identifier" {
                    import = import.with_alias(node_text(alias, code));
                }
            }
            out.imports.push(import);
        }
    }

    /// Walk a function body for call sites and local bindings.
    fn scan_body(&self, node: Node, code: &str, caller: &str, out: &mut ParsedFile, depth: usize) {
        if !check_recursion_depth(depth, node) {
            return;
        }

        match node.kind() {
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    let line = start_line(node);
                    let column = node.start_position().column as u32;
                    match function.kind() {
                        "selector_expression" => {
                            let receiver = function
                                .child_by_field_name("operand")
                                .map(|n| node_text(n, code).to_string());
                            let method = function
                                .child_by_field_name("field")
                                .map(|n| node_text(n, code).to_string());
                            if let (Some(receiver), Some(method)) = (receiver, method) {
                                out.calls.push(
                                    NewMethodCall::new(caller, method, line, column)
                                        .with_receiver(receiver),
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
            }
            "short_var_declaration" => {
                self.handle_short_var(node, code, caller, out);
            }
            "var_declaration" => {
                // Locals with explicit types.
                let mut cursor = node.walk();
                for spec in node.named_children(&mut cursor) {
                    if spec.kind() != "var_spec" {
                        continue;
                    }
                    let Some(type_node) = spec.child_by_field_name("type") else {
                        continue;
                    };
                    let type_name = bare_type_name(type_node, code);
                    if type_name.is_empty() {
                        continue;
                    }
                    let mut names = spec.walk();
                    for part in spec.named_children(&mut names) {
                        if part.kind() != "identifier" {
                            break;
                        }
                        out.bindings.push(TypeBinding {
                            scope: caller.to_string(),
                            name: node_text(part, code).to_string(),
                            type_name: type_name.clone(),
                            source: BindingSource::Annotation,
                            line: start_line(spec),
                        });
                    }
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.scan_body(child, code, caller, out, depth + 1);
        }
    }

    /// `s := Server{...}` and `s := &Server{...}` are constructor bindings.
    fn handle_short_var(&self, node: Node, code: &str, caller: &str, out: &mut ParsedFile) {
        let left = node.child_by_field_name("left");
        let right = node.child_by_field_name("right");
        let (Some(left), Some(right)) = (left, right) else {
            return;
        };
        let name_node = left.named_child(0);
        let value_node = right.named_child(0);
        let (Some(name_node), Some(value_node)) = (name_node, value_node) else {
            return;
        };
        if name_node.kind() != "identifier" || left.named_child_count() != 1 {
            return;
        }

        let literal = match value_node.kind() {
            "composite_literal" => Some(value_node),
            "unary_expression" => value_node
                .named_child(0)
                .filter(|inner| inner.kind() == "composite_literal"),
            _ => None,
        };
        let Some(literal) = literal else {
            return;
        };
        let Some(type_node) = literal.child_by_field_name("type") else {
            return;
        };
        let type_name = bare_type_name(type_node, code);
        if type_name.is_empty() {
            return;
        }
        out.bindings.push(TypeBinding {
            scope: caller.to_string(),
            name: node_text(name_node, code).to_string(),
            type_name,
            source: BindingSource::Constructor,
            line: start_line(node),
        });
    }

    fn collect_elisions(&self, root: Node, elisions: &mut Vec<Elision>) {
        let mut cursor = root.walk();
        for node in root.named_children(&mut cursor) {
            if matches!(node.kind(), "function_declaration" | "method_declaration") {
                if let Some(body) = node.child_by_field_name("body") {
                    elisions.push(Elision {
                        start_byte: body.start_byte(),
                        end_byte: body.end_byte(),
                        placeholder: "{ ... }".to_string(),
                    });
                }
            }
        }
    }
}

/// Strip pointers, slices and package qualifiers down to the bare type name:
/// `*pkg.Server` → `Server`, `[]Item` → `Item`.
fn bare_type_name(node: Node, code: &str) -> String {
    let text = node_text(node, code);
    let trimmed = text
        .trim_start_matches(['*', '&'])
        .trim_start_matches("[]");
    let last = trimmed.rsplit('.').next().unwrap_or(trimmed);
    let name: String = last
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    name
}

/// Receiver type from `func (s *Server) ...`.
fn receiver_type_name(receiver: Node, code: &str) -> Option<String> {
    let mut cursor = receiver.walk();
    for param in receiver.named_children(&mut cursor) {
        if param.kind() != "parameter_declaration" {
            continue;
        }
        if let Some(type_node) = param.child_by_field_name("type") {
            let name = bare_type_name(type_node, code);
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

/// Receiver variable name from `func (s *Server) ...`.
fn receiver_var_name(receiver: Node, code: &str) -> Option<String> {
    let mut cursor = receiver.walk();
    for param in receiver.named_children(&mut cursor) {
        if param.kind() != "parameter_declaration" {
            continue;
        }
        if let Some(name) = param.child_by_field_name("name") {
            return Some(node_text(name, code).to_string());
        }
    }
    None
}

fn collect_nodes_of_kind<'a>(node: Node<'a>, kind: &str, out: &mut Vec<Node<'a>>) {
    if node.kind() == kind {
        out.push(node);
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_nodes_of_kind(child, kind, out);
    }
}

/// Consecutive `//` comment lines immediately above a declaration.
fn doc_comment_before(node: Node, code: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut current = node;
    let mut expected_line = node.start_position().row;

    while let Some(prev) = current.prev_sibling() {
        if prev.kind() != "comment" {
            break;
        }
        // Only a contiguous run directly above the declaration counts.
        if prev.end_position().row + 1 != expected_line {
            break;
        }
        let text = node_text(prev, code)
            .trim_start_matches("//")
            .trim()
            .to_string();
        lines.push(text);
        expected_line = prev.start_position().row;
        current = prev;
    }

    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let joined = lines.join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl LanguageParser for GoParser {
    fn language(&self) -> Language {
        Language::Go
    }

    fn parse(&mut self, code: &str) -> ParseResult<ParsedFile> {
        let tree = self.parse_tree(code)?;
        let mut out = ParsedFile::default();
        self.extract_top_level(tree.root_node(), code, &mut out);
        Ok(out)
    }

    fn skeletonize_preserving(
        &mut self,
        code: &str,
        preserve: &[crate::types::LineSpan],
    ) -> ParseResult<Skeleton> {
        let tree = self.parse_tree(code)?;
        let mut elisions = Vec::new();
        self.collect_elisions(tree.root_node(), &mut elisions);
        Ok(render_preserving(code, elisions, preserve))
    }
}
