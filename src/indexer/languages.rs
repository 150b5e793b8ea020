use tree_sitter::Language;

/// A grammar plus the file extensions and node kinds it is used for.
pub struct LanguageConfig {
    pub name: &'static str,
    pub language: Language,
    pub extensions: &'static [&'static str],
    /// Node kinds treated as function-level chunks.
    pub function_kinds: &'static [&'static str],
}

impl LanguageConfig {
    pub fn get_all() -> Vec<LanguageConfig> {
        vec![
            cpp_config(),
            go_config(),
            python_config(),
            typescript_config(),
            javascript_config(),
            rust_config(),
        ]
    }

    pub fn get_by_name(name: &str) -> Option<LanguageConfig> {
        Self::get_all().into_iter().find(|c| c.name == name)
    }

    /// Names accepted by [`LanguageConfig::get_by_name`].
    pub fn names() -> Vec<&'static str> {
        Self::get_all().iter().map(|c| c.name).collect()
    }

    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext)
    }

    pub fn is_function(&self, kind: &str) -> bool {
        self.function_kinds.contains(&kind)
    }
}

fn cpp_config() -> LanguageConfig {
    LanguageConfig {
        name: "cpp",
        language: tree_sitter_cpp::LANGUAGE.into(),
        extensions: &["cc", "cpp", "h", "hpp"],
        function_kinds: &["function_definition"],
    }
}

fn go_config() -> LanguageConfig {
    LanguageConfig {
        name: "go",
        language: tree_sitter_go::LANGUAGE.into(),
        extensions: &["go"],
        function_kinds: &["function_declaration", "method_declaration", "func_literal"],
    }
}

fn python_config() -> LanguageConfig {
    LanguageConfig {
        name: "python",
        language: tree_sitter_python::LANGUAGE.into(),
        extensions: &["py"],
        function_kinds: &["function_definition"],
    }
}

fn typescript_config() -> LanguageConfig {
    LanguageConfig {
        name: "typescript",
        language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        extensions: &["ts"],
        function_kinds: &[
            "function_declaration",
            "generator_function_declaration",
            "method_definition",
        ],
    }
}

fn javascript_config() -> LanguageConfig {
    LanguageConfig {
        name: "javascript",
        language: tree_sitter_javascript::LANGUAGE.into(),
        extensions: &["js", "jsx"],
        function_kinds: &[
            "function_declaration",
            "generator_function_declaration",
            "method_definition",
        ],
    }
}

fn rust_config() -> LanguageConfig {
    LanguageConfig {
        name: "rust",
        language: tree_sitter_rust::LANGUAGE.into(),
        extensions: &["rs"],
        function_kinds: &["function_item"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpp_extensions() {
        let cpp = LanguageConfig::get_by_name("cpp").unwrap();
        for ext in ["cc", "cpp", "h", "hpp"] {
            assert!(cpp.matches_extension(ext), "{ext} should be C++");
        }
        assert!(!cpp.matches_extension("c"));
        assert!(cpp.is_function("function_definition"));
        assert!(!cpp.is_function("lambda_expression"));
    }

    #[test]
    fn test_lookup() {
        assert_eq!(LanguageConfig::get_by_name("rust").unwrap().extensions, ["rs"]);
        assert!(LanguageConfig::get_by_name("cobol").is_none());
        assert!(LanguageConfig::names().contains(&"cpp"));
    }
}
