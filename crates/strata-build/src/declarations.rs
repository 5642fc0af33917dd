//! Declaration-level front end and emitter
//!
//! A lightweight stand-in for the full compiler: it checks that braces
//! balance, resolves bare package imports, and derives each file's public
//! surface from its `export` declarations. Function bodies, variable
//! initializers, comments and formatting never reach the surface, so editing
//! them leaves the signature unchanged.

use crate::frontend::{
    Cancelled, CheckContext, Checked, Diagnostic, Emitter, FrontEnd, Program, SurfaceSignature,
};
use crate::graph::Project;
use crate::snapshot::{hash_bytes, FileSnapshot};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

const ITEM_KEYWORDS: &[&str] = &[
    "export",
    "import",
    "function",
    "interface",
    "class",
    "type",
    "const",
    "let",
    "var",
    "enum",
];

/// One checked source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedFile {
    pub path: PathBuf,
    /// Source with comments removed
    pub code: String,
    /// Normalised export declarations, in source order
    pub declarations: Vec<String>,
}

/// Output of [`DeclarationFrontEnd`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclarationProgram {
    pub files: Vec<CheckedFile>,
}

impl Program for DeclarationProgram {
    fn surface(&self) -> SurfaceSignature {
        let files: BTreeMap<PathBuf, String> = self
            .files
            .iter()
            .map(|file| {
                (
                    file.path.clone(),
                    hash_bytes(file.declarations.join("\n").as_bytes()),
                )
            })
            .collect();
        SurfaceSignature::from_files(files)
    }
}

/// Front end that checks structure and extracts declarations
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationFrontEnd;

impl DeclarationFrontEnd {
    pub fn new() -> Self {
        Self
    }
}

impl FrontEnd for DeclarationFrontEnd {
    type Program = DeclarationProgram;

    fn check(
        &self,
        project: &Project,
        snapshot: &FileSnapshot,
        cx: &mut CheckContext<'_>,
    ) -> Result<Checked<DeclarationProgram>, Cancelled> {
        let strict = project.options().strict;
        let mut diagnostics = Vec::new();
        let mut files = Vec::with_capacity(snapshot.len());

        for record in snapshot.records() {
            cx.cancel.check()?;
            let path = &record.path;

            let source = match fs::read_to_string(path) {
                Ok(source) => source,
                Err(e) => {
                    diagnostics.push(Diagnostic::error(
                        Some(path.clone()),
                        format!("cannot read file: {}", e),
                    ));
                    continue;
                }
            };

            let code = strip_comments(&source);
            if let Err(message) = check_braces(&code) {
                diagnostics.push(Diagnostic::error(Some(path.clone()), message));
            }

            let mut declarations = Vec::new();
            for item in split_items(&code) {
                if let Some(specifier) = import_specifier(item) {
                    let Some(package) = bare_package_name(specifier) else {
                        continue;
                    };
                    let from_dir = path.parent().unwrap_or_else(|| Path::new("/"));
                    if cx.packages.resolve_package(from_dir, package).is_none() {
                        let message = format!("cannot find package '{}'", package);
                        diagnostics.push(if strict {
                            Diagnostic::error(Some(path.clone()), message)
                        } else {
                            Diagnostic::warning(Some(path.clone()), message)
                        });
                    }
                } else if let Some(declaration) = export_declaration(item) {
                    declarations.push(declaration);
                }
            }

            trace!(file = %path.display(), exports = declarations.len(), "checked file");
            files.push(CheckedFile {
                path: path.clone(),
                code,
                declarations,
            });
        }

        Ok(Checked {
            diagnostics,
            program: DeclarationProgram { files },
        })
    }
}

/// Writes `.js` output and optional `.d.st` declaration files
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationEmitter;

impl DeclarationEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl Emitter<DeclarationProgram> for DeclarationEmitter {
    fn emit(&self, project: &Project, program: &DeclarationProgram) -> io::Result<Vec<PathBuf>> {
        let out_dir = project.out_dir();
        let root_dir = project
            .options()
            .root_dir
            .clone()
            .unwrap_or_else(|| project.config.project_dir().to_path_buf());
        let mut written = Vec::new();

        for file in &program.files {
            let relative = file
                .path
                .strip_prefix(&root_dir)
                .ok()
                .map(Path::to_path_buf)
                .or_else(|| file.path.file_name().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("out"));
            let target = out_dir.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let js = target.with_extension("js");
            fs::write(&js, &file.code)?;
            written.push(js);

            if project.options().declaration {
                let dts = target.with_extension("d.st");
                let mut content = file.declarations.join(";\n");
                if !content.is_empty() {
                    content.push_str(";\n");
                }
                fs::write(&dts, content)?;
                written.push(dts);
            }
        }

        Ok(written)
    }
}

/// Byte mask of `text` with the inside of string literals blanked out
fn mask_strings(text: &str) -> Vec<u8> {
    let mut masked = text.as_bytes().to_vec();
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for byte in masked.iter_mut() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    *byte = b' ';
                } else if *byte == b'\\' {
                    escaped = true;
                    *byte = b' ';
                } else if *byte == q {
                    quote = None;
                } else if *byte != b'\n' {
                    *byte = b' ';
                }
            }
            None => {
                if matches!(*byte, b'"' | b'\'' | b'`') {
                    quote = Some(*byte);
                }
            }
        }
    }
    masked
}

/// Remove `//` and `/* */` comments, keeping line breaks
pub fn strip_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if let Some(q) = quote {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match (byte, bytes.get(i + 1)) {
            (b'/', Some(b'/')) => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    if bytes[i] == b'\n' {
                        out.push(b'\n');
                    }
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                out.push(b' ');
            }
            _ => {
                if matches!(byte, b'"' | b'\'' | b'`') {
                    quote = Some(byte);
                }
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Check that `{}`, `()` and `[]` nest properly outside string literals
pub fn check_braces(code: &str) -> Result<(), String> {
    let masked = mask_strings(code);
    let mut stack: Vec<(u8, usize)> = Vec::new();
    let mut line = 1;

    for &byte in &masked {
        match byte {
            b'\n' => line += 1,
            b'{' | b'(' | b'[' => stack.push((byte, line)),
            b'}' | b')' | b']' => {
                let expected = match byte {
                    b'}' => b'{',
                    b')' => b'(',
                    _ => b'[',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => {
                        return Err(format!(
                            "unbalanced braces: unexpected '{}' on line {}",
                            byte as char, line
                        ))
                    }
                }
            }
            _ => {}
        }
    }

    match stack.pop() {
        Some((open, line)) => Err(format!(
            "unbalanced braces: '{}' opened on line {} is never closed",
            open as char, line
        )),
        None => Ok(()),
    }
}

/// Split code into top-level items
///
/// An item starts on a line that begins, at nesting depth zero, with a
/// declaration keyword and runs until the next such line.
fn split_items(code: &str) -> Vec<&str> {
    let masked = mask_strings(code);
    let mut items = Vec::new();
    let mut depth: i64 = 0;
    let mut item_start: Option<usize> = None;
    let mut line_start = 0;

    while line_start < code.len() {
        let line_end = code[line_start..]
            .find('\n')
            .map(|i| line_start + i + 1)
            .unwrap_or(code.len());
        let line = &code[line_start..line_end];

        if depth <= 0 && starts_with_keyword(line.trim_start()) {
            if let Some(start) = item_start {
                items.push(&code[start..line_start]);
            }
            item_start = Some(line_start);
        }

        for &byte in &masked[line_start..line_end] {
            match byte {
                b'{' | b'(' | b'[' => depth += 1,
                b'}' | b')' | b']' => depth -= 1,
                _ => {}
            }
        }
        line_start = line_end;
    }

    if let Some(start) = item_start {
        items.push(&code[start..]);
    }
    items
}

fn starts_with_keyword(line: &str) -> bool {
    let word: String = line
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    ITEM_KEYWORDS.contains(&word.as_str())
}

/// Module specifier of an `import` item
fn import_specifier(item: &str) -> Option<&str> {
    let rest = item.trim_start().strip_prefix("import")?;
    if rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let open = rest.find(['"', '\''])?;
    let quote = rest[open..].chars().next()?;
    let after = &rest[open + 1..];
    let close = after.find(quote)?;
    Some(&after[..close])
}

/// Package part of a bare specifier; `None` for relative and absolute paths
fn bare_package_name(specifier: &str) -> Option<&str> {
    if specifier.is_empty() || specifier.starts_with('.') || specifier.starts_with('/') {
        return None;
    }
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next()?;
    if first.starts_with('@') {
        let second = parts.next()?;
        Some(&specifier[..first.len() + 1 + second.len()])
    } else {
        Some(first)
    }
}

/// Normalised declaration of an `export` item
fn export_declaration(item: &str) -> Option<String> {
    let trimmed = item.trim();
    let rest = trimmed.strip_prefix("export")?;
    if rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    let masked = mask_strings(trimmed);
    let mut words = rest.split_whitespace();
    let mut kind = words.next().unwrap_or_default();
    while matches!(kind, "default" | "async" | "declare") {
        kind = words.next().unwrap_or_default();
    }

    let end = match kind {
        "function" => body_start(&masked).unwrap_or(trimmed.len()),
        "const" | "let" | "var" => initializer_start(&masked).unwrap_or(trimmed.len()),
        _ => trimmed.len(),
    };

    let declaration = normalise_whitespace(&trimmed[..end]);
    Some(declaration.trim_end_matches(';').trim_end().to_string())
}

/// Position of the first `{` outside parentheses and angle brackets
fn body_start(masked: &[u8]) -> Option<usize> {
    let mut parens = 0i32;
    for (i, &byte) in masked.iter().enumerate() {
        match byte {
            b'(' | b'<' => parens += 1,
            b')' => parens -= 1,
            b'>' if i > 0 && masked[i - 1] != b'=' => parens -= 1,
            b'{' if parens <= 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Position of the first assignment `=` at nesting depth zero
fn initializer_start(masked: &[u8]) -> Option<usize> {
    let mut depth = 0i32;
    for (i, &byte) in masked.iter().enumerate() {
        match byte {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'>' if i > 0 && masked[i - 1] != b'=' => depth -= 1,
            b'=' if depth <= 0 => {
                let next = masked.get(i + 1).copied();
                let prev = if i > 0 { masked[i - 1] } else { b' ' };
                if next != Some(b'>') && next != Some(b'=') && !b"=!<>".contains(&prev) {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn normalise_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{CancellationToken, Severity};
    use crate::graph::ProjectGraph;
    use crate::package_cache::PackageMetadataCache;
    use crate::snapshot::VersionCache;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use strata_config::ConfigLoader;
    use tempfile::TempDir;

    fn declarations_of(source: &str) -> Vec<String> {
        split_items(&strip_comments(source))
            .into_iter()
            .filter_map(export_declaration)
            .collect()
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let source = "let a = \"// not a comment\"; // gone\n/* block\n */let b = 1;";
        assert_eq!(
            strip_comments(source),
            "let a = \"// not a comment\"; \n\n let b = 1;"
        );
    }

    #[rstest]
    #[case("function f() { return [1, (2)]; }", true)]
    #[case("let s = \"}\";", true)]
    #[case("function f() { ", false)]
    #[case("}", false)]
    #[case("f(]", false)]
    fn test_check_braces(#[case] code: &str, #[case] balanced: bool) {
        assert_eq!(check_braces(code).is_ok(), balanced);
    }

    #[test]
    fn test_unclosed_brace_message() {
        let error = check_braces("export interface Point {\n  x: number\n").unwrap_err();
        insta::assert_snapshot!(error, @"unbalanced braces: '{' opened on line 1 is never closed");
    }

    #[test]
    fn test_function_bodies_are_not_surface() {
        let a = declarations_of("export function area(p: Point): number {\n  return p.x * 2;\n}\n");
        let b = declarations_of(
            "export function area(p: Point): number {\n  // doubled\n  return p.x + p.x;\n}\n",
        );
        assert_eq!(a, vec!["export function area(p: Point): number"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_interface_body_is_surface() {
        let before = declarations_of("export interface Point {\n  x: number\n}\n");
        let after = declarations_of("export interface Point {\n  x: number\n  y: number\n}\n");
        assert_eq!(before, vec!["export interface Point { x: number }"]);
        assert_ne!(before, after);
    }

    #[test]
    fn test_initializers_and_private_items_are_ignored() {
        let declarations = declarations_of(
            "const secret = 1;\nexport const limit: number = 10;\nfunction helper() {}\nexport type Id = string;\n",
        );
        assert_eq!(
            declarations,
            vec!["export const limit: number", "export type Id = string"]
        );
    }

    #[rstest]
    #[case("import { Point } from \"geo\";", Some("geo"))]
    #[case("import \"@scope/pkg/sub\";", Some("@scope/pkg"))]
    #[case("import { a } from './local';", None)]
    #[case("import { a } from \"/abs/path\";", None)]
    #[case("important = 1;", None)]
    fn test_bare_imports(#[case] item: &str, #[case] package: Option<&str>) {
        assert_eq!(import_specifier(item).and_then(bare_package_name), package);
    }

    fn write_project(dir: &Path, options: &str, source: &str) -> ProjectGraph {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(
            dir.join("strata.json"),
            format!(r#"{{ "compilerOptions": {{ "outDir": "out"{} }} }}"#, options),
        )
        .unwrap();
        fs::write(dir.join("src/index.st"), source).unwrap();
        let mut loader = ConfigLoader::new();
        let closure = loader.load_closure(&[dir.to_path_buf()]);
        ProjectGraph::from_closure(closure).unwrap()
    }

    fn check(graph: &ProjectGraph, cancel: &CancellationToken) -> Result<Checked<DeclarationProgram>, Cancelled> {
        let project = &graph.projects()[0];
        let snapshot = FileSnapshot::capture(project.root_files(), &mut VersionCache::new());
        let mut packages = PackageMetadataCache::new();
        let mut cx = CheckContext {
            cancel,
            packages: &mut packages,
        };
        DeclarationFrontEnd::new().check(project, &snapshot, &mut cx)
    }

    #[test]
    fn test_check_reports_errors_and_unresolved_packages() {
        let temp = TempDir::new().unwrap();
        let graph = write_project(
            temp.path(),
            "",
            "import { z } from \"nowhere-pkg\";\nexport function f() {\n",
        );

        let checked = check(&graph, &CancellationToken::new()).unwrap();
        let severities: Vec<Severity> = checked.diagnostics.iter().map(|d| d.severity).collect();
        assert_eq!(severities, vec![Severity::Error, Severity::Warning]);
        assert_eq!(checked.error_count(), 1);
        assert!(checked.diagnostics[1].message.contains("nowhere-pkg"));
    }

    #[test]
    fn test_check_observes_cancellation() {
        let temp = TempDir::new().unwrap();
        let graph = write_project(temp.path(), "", "export const a = 1;\n");
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(check(&graph, &cancel).unwrap_err(), Cancelled);
    }

    #[test]
    fn test_emit_writes_js_and_declarations() {
        let temp = TempDir::new().unwrap();
        let graph = write_project(
            temp.path(),
            r#", "declaration": true"#,
            "// header\nexport interface Point { x: number }\n",
        );
        let checked = check(&graph, &CancellationToken::new()).unwrap();
        let project = &graph.projects()[0];

        let written = DeclarationEmitter::new()
            .emit(project, &checked.program)
            .unwrap();

        let out = project.out_dir();
        assert_eq!(
            written,
            vec![out.join("src/index.js"), out.join("src/index.d.st")]
        );
        assert_eq!(
            fs::read_to_string(out.join("src/index.d.st")).unwrap(),
            "export interface Point { x: number };\n"
        );
        assert!(!fs::read_to_string(out.join("src/index.js"))
            .unwrap()
            .contains("header"));
    }
}
