//! Function-level chunk extraction over tree-sitter syntax trees.
use super::languages::LanguageConfig;
use ignore::{Walk, WalkBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use tree_sitter::{Parser, Tree};

/// One function-level unit of source code.
///
/// Lines are 1-based and inclusive. `code` is the exact text of those lines
/// joined by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub file: String,
    #[serde(rename = "start")]
    pub start_line: usize,
    #[serde(rename = "end")]
    pub end_line: usize,
    pub code: String,
}

/// Per-file extraction failures. None of these abort a run.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Decode { path: PathBuf },

    #[error("failed to parse {path}")]
    Parse { path: PathBuf },

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to load grammar: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub files_seen: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub chunks: usize,
}

/// Walks a codebase with one grammar and pulls out function definitions.
pub struct Extractor {
    config: LanguageConfig,
    parser: Parser,
    root: PathBuf,
}

impl Extractor {
    pub fn new(language: &str, root: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let config = LanguageConfig::get_by_name(language)
            .ok_or_else(|| ExtractError::UnsupportedLanguage(language.to_string()))?;

        let mut parser = Parser::new();
        parser.set_language(&config.language)?;

        Ok(Self {
            config,
            parser,
            root: root.into(),
        })
    }

    pub fn language(&self) -> &LanguageConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file under the root with one of the language's extensions, in a
    /// stable, name-sorted traversal order. Ignore files are not consulted.
    pub fn source_files(&self) -> SourceFiles {
        SourceFiles::new(&self.root, self.config.extensions)
    }

    /// Lazily extract every chunk of the codebase.
    pub fn chunks(&mut self) -> ChunkStream<'_> {
        let files = self.source_files();
        ChunkStream {
            extractor: self,
            files,
            pending: Vec::new().into_iter(),
            stats: ExtractStats::default(),
        }
    }

    /// Extract one file, logging and counting failures instead of returning them.
    pub fn extract_counted(&mut self, path: &Path, stats: &mut ExtractStats) -> Vec<Chunk> {
        stats.files_seen += 1;
        match self.extract_file(path) {
            Ok(chunks) => {
                stats.files_parsed += 1;
                stats.chunks += chunks.len();
                chunks
            }
            Err(e) => {
                warn!("Skipping file: {e}");
                stats.files_skipped += 1;
                Vec::new()
            }
        }
    }

    /// Extract all function chunks from a single file.
    pub fn extract_file(&mut self, path: &Path) -> Result<Vec<Chunk>, ExtractError> {
        let bytes = fs::read(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let source = String::from_utf8(bytes).map_err(|_| ExtractError::Decode {
            path: path.to_path_buf(),
        })?;

        let relative = self.relativize(path);
        self.extract_source(&source, &relative).map_err(|_| ExtractError::Parse {
            path: path.to_path_buf(),
        })
    }

    /// Extract chunks from in-memory source, labelling them with `file`.
    pub fn extract_source(
        &mut self,
        source: &str,
        file: &str,
    ) -> Result<Vec<Chunk>, ExtractError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ExtractError::Parse {
                path: PathBuf::from(file),
            })?;

        if tree.root_node().has_error() {
            debug!("{file} parsed with syntax errors");
        }

        let lines: Vec<&str> = source.lines().collect();
        Ok(self.collect_functions(&tree, &lines, file))
    }

    /// Depth-first walk driven by a cursor, so tree depth never grows the
    /// call stack.
    fn collect_functions(&self, tree: &Tree, lines: &[&str], file: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut cursor = tree.walk();
        let mut visited = HashSet::new();

        loop {
            let node = cursor.node();
            if visited.insert(node.id()) {
                if self.config.is_function(node.kind()) {
                    let start = node.start_position().row;
                    let end = node.end_position().row;
                    if let Some(chunk) = slice_chunk(lines, file, start, end) {
                        chunks.push(chunk);
                    }
                }
                if cursor.goto_first_child() {
                    continue;
                }
            }

            if cursor.goto_next_sibling() {
                continue;
            }

            // Climb until some ancestor has a next sibling
            loop {
                if !cursor.goto_parent() {
                    return chunks;
                }
                if cursor.goto_next_sibling() {
                    break;
                }
            }
        }
    }

    fn relativize(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Build a chunk from 0-based rows, clamping the end to the file length.
fn slice_chunk(lines: &[&str], file: &str, start_row: usize, end_row: usize) -> Option<Chunk> {
    if start_row >= lines.len() {
        return None;
    }
    let end_row = end_row.clamp(start_row, lines.len() - 1);

    Some(Chunk {
        file: file.to_string(),
        start_line: start_row + 1,
        end_line: end_row + 1,
        code: lines[start_row..=end_row].join("\n"),
    })
}

/// Lines `[start_line, end_line]` (1-based, inclusive) of `source`, joined
/// the same way chunk code is.
pub fn slice_lines(source: &str, start_line: usize, end_line: usize) -> Option<String> {
    if start_line == 0 || end_line < start_line {
        return None;
    }
    let lines: Vec<&str> = source.lines().collect();
    lines
        .get(start_line - 1..end_line)
        .map(|span| span.join("\n"))
}

/// Name-sorted walk over the files of one language.
pub struct SourceFiles {
    walk: Walk,
    extensions: &'static [&'static str],
}

impl SourceFiles {
    fn new(root: &Path, extensions: &'static [&'static str]) -> Self {
        let walk = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        Self { walk, extensions }
    }
}

impl Iterator for SourceFiles {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        for entry in self.walk.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Directory walk error: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let ext = entry
                .path()
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if self.extensions.contains(&ext) {
                return Some(entry.into_path());
            }
            debug!("ignoring {}", entry.path().display());
        }
        None
    }
}

/// Lazy sequence of chunks across a whole codebase.
pub struct ChunkStream<'a> {
    extractor: &'a mut Extractor,
    files: SourceFiles,
    pending: std::vec::IntoIter<Chunk>,
    stats: ExtractStats,
}

impl ChunkStream<'_> {
    /// Counters for the files consumed so far.
    pub fn stats(&self) -> ExtractStats {
        self.stats
    }
}

impl Iterator for ChunkStream<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            if let Some(chunk) = self.pending.next() {
                return Some(chunk);
            }
            let path = self.files.next()?;
            self.pending = self
                .extractor
                .extract_counted(&path, &mut self.stats)
                .into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tree_sitter::Node;

    const A_CPP: &str = "int add(int a, int b) { return a + b; }\nvoid hello() {\n    std::cout << \"Hello\" << std::endl;\n}\n";

    fn cpp() -> Extractor {
        Extractor::new("cpp", ".").expect("cpp grammar should load")
    }

    /// Independent recursive count used to cross-check the cursor walk.
    fn function_spans(node: Node, kind: &str, out: &mut Vec<(usize, usize)>) {
        if node.kind() == kind {
            out.push((node.start_position().row + 1, node.end_position().row + 1));
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            function_spans(child, kind, out);
        }
    }

    #[test]
    fn test_two_functions() {
        let chunks = cpp().extract_source(A_CPP, "a.cpp").unwrap();
        assert_eq!(
            chunks,
            vec![
                Chunk {
                    file: "a.cpp".to_string(),
                    start_line: 1,
                    end_line: 1,
                    code: "int add(int a, int b) { return a + b; }".to_string(),
                },
                Chunk {
                    file: "a.cpp".to_string(),
                    start_line: 2,
                    end_line: 4,
                    code: "void hello() {\n    std::cout << \"Hello\" << std::endl;\n}".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_nested_functions_emitted_independently() {
        let source = "void outer() {\n    struct Local {\n        int get() { return 1; }\n    };\n}\n";
        let chunks = cpp().extract_source(source, "n.cpp").unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 5));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (3, 3));
        assert!(chunks[0].code.contains(&chunks[1].code));
    }

    #[test]
    fn test_traversal_matches_recursive_count() {
        let source = r#"
namespace db {
class Table {
public:
    int rows() const { return n; }
    void clear();
private:
    int n = 0;
};

void Table::clear() {
    auto reset = [this]() { n = 0; };
    struct Helper { static void run() {} };
    Helper::run();
    reset();
}
}

template <typename T>
T max_of(T a, T b) {
    return a > b ? a : b;
}
"#;
        let mut extractor = cpp();
        let chunks = extractor.extract_source(source, "t.cpp").unwrap();

        let mut parser = Parser::new();
        parser.set_language(&extractor.language().language).unwrap();
        let tree = parser.parse(source, None).unwrap();
        let mut expected = Vec::new();
        function_spans(tree.root_node(), "function_definition", &mut expected);

        let actual: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
        assert_eq!(actual, expected);
        assert!(expected.len() >= 4);
    }

    #[test]
    fn test_deeply_nested_tree() {
        let depth = 5000;
        let source = format!(
            "void deep(int x) {{\n{}\n{}\n}}\n",
            "if (x) {".repeat(depth),
            "}".repeat(depth)
        );
        let chunks = cpp().extract_source(&source, "deep.cpp").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 4));
    }

    #[test]
    fn test_empty_source() {
        assert!(cpp().extract_source("", "e.cpp").unwrap().is_empty());
    }

    #[test]
    fn test_codebase_walk_and_span_fidelity() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/util")).unwrap();
        fs::write(root.join("a.cpp"), A_CPP).unwrap();
        fs::write(
            root.join("src/util/math.hpp"),
            "inline int sq(int x) {\n    return x * x;\n}\n",
        )
        .unwrap();
        fs::write(root.join("src/notes.txt"), "int not_code() { return 0; }\n").unwrap();
        fs::write(root.join("src/broken.h"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let mut extractor = Extractor::new("cpp", root).unwrap();
        let mut stream = extractor.chunks();
        let chunks: Vec<Chunk> = stream.by_ref().collect();
        let stats = stream.stats();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].file, "a.cpp");
        assert_eq!(chunks[2].file, "src/util/math.hpp");
        assert_eq!(
            stats,
            ExtractStats {
                files_seen: 3,
                files_parsed: 2,
                files_skipped: 1,
                chunks: 3,
            }
        );

        for chunk in &chunks {
            let source = fs::read_to_string(root.join(&chunk.file)).unwrap();
            assert_eq!(
                slice_lines(&source, chunk.start_line, chunk.end_line).as_deref(),
                Some(chunk.code.as_str())
            );
            assert!(chunk.start_line <= chunk.end_line);
        }
    }

    #[test]
    fn test_walk_ignores_ignore_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("gen")).unwrap();
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(root.join(".ignore"), "gen/\n").unwrap();
        fs::write(root.join(".gitignore"), "vendor/\n*.h\n").unwrap();
        fs::write(root.join("a.cpp"), "void a() {}\n").unwrap();
        fs::write(root.join("gen/b.cpp"), "void b() {}\n").unwrap();
        fs::write(root.join("vendor/c.cpp"), "void c() {}\n").unwrap();
        fs::write(root.join("d.h"), "void d() {}\n").unwrap();

        let mut extractor = Extractor::new("cpp", root).unwrap();
        let files: Vec<String> = extractor.chunks().map(|c| c.file).collect();
        assert_eq!(files, vec!["a.cpp", "d.h", "gen/b.cpp", "vendor/c.cpp"]);
    }

    #[test]
    fn test_unsupported_language() {
        assert!(matches!(
            Extractor::new("cobol", "."),
            Err(ExtractError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_python_extraction() {
        let mut extractor = Extractor::new("python", ".").unwrap();
        let source = "def outer():\n    def inner():\n        pass\n    return inner\n";
        let chunks = extractor.extract_source(source, "m.py").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (2, 3));
    }

    #[test]
    fn test_chunk_log_field_names() {
        let chunk = Chunk {
            file: "a.cpp".to_string(),
            start_line: 1,
            end_line: 2,
            code: "x".to_string(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["start"], 1);
        assert_eq!(json["end"], 2);
    }
}
