use std::collections::HashMap;

use serde::Deserialize;

use super::ExecError;

/// A program plus its argument template
///
/// Arguments may contain the placeholders `%INPUT%` (source path), `%OUTPUT%`
/// (compiled artifact path), `%DIR%` (workspace directory) and `%NAME%` (source stem).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A fully substituted command, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Applies template substitutions to the program and every argument
    pub fn render(&self, mapping: &HashMap<&str, String>) -> ResolvedCommand {
        let substitute = |s: &String| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        };

        ResolvedCommand {
            program: substitute(&self.program),
            args: self.args.iter().map(substitute).collect(),
        }
    }
}

/// How the source file inside a workspace is named
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceNaming {
    Fixed { stem: String },
    /// Named after the class declared in the source (javac insists on it)
    ClassName { fallback: String },
}

impl Default for SourceNaming {
    fn default() -> Self {
        Self::Fixed {
            stem: "main".to_string(),
        }
    }
}

impl SourceNaming {
    pub fn stem(&self, source: &str) -> String {
        match self {
            Self::Fixed { stem } => stem.clone(),
            Self::ClassName { fallback } => {
                detect_class_name(source).unwrap_or_else(|| fallback.clone())
            }
        }
    }
}

/// Finds the first public top-level class, or else the first top-level class.
fn detect_class_name(source: &str) -> Option<String> {
    let mut first_class = None;

    for line in source.lines() {
        let mut words = line.split_whitespace().peekable();
        let mut is_public = false;
        while let Some(&word) = words.peek() {
            match word {
                "public" => is_public = true,
                "final" | "abstract" | "strictfp" => {}
                _ => break,
            }
            words.next();
        }
        if words.next() != Some("class") {
            continue;
        }
        let Some(name) = words.next() else {
            continue;
        };
        let name: String = name
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if is_public {
            return Some(name);
        }
        first_class.get_or_insert(name);
    }

    first_class
}

/// Everything needed to turn source text of one language into a running process
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolchainDescriptor {
    /// Canonical language identifier, lower case
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Source file extension, without the dot
    pub extension: String,
    #[serde(default)]
    pub naming: SourceNaming,
    #[serde(default)]
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
}

impl ToolchainDescriptor {
    pub fn requires_compilation(&self) -> bool {
        self.compile.is_some()
    }

    fn builtins() -> Vec<Self> {
        vec![
            Self {
                name: "python".to_string(),
                aliases: vec!["py".to_string(), "python3".to_string()],
                extension: "py".to_string(),
                naming: SourceNaming::default(),
                compile: None,
                run: CommandTemplate::new("python3", &["%INPUT%"]),
            },
            Self {
                name: "javascript".to_string(),
                aliases: vec!["js".to_string(), "node".to_string()],
                extension: "js".to_string(),
                naming: SourceNaming::default(),
                compile: None,
                run: CommandTemplate::new("node", &["%INPUT%"]),
            },
            Self {
                name: "java".to_string(),
                aliases: vec![],
                extension: "java".to_string(),
                naming: SourceNaming::ClassName {
                    fallback: "Main".to_string(),
                },
                compile: Some(CommandTemplate::new(
                    "javac",
                    &["-encoding", "UTF-8", "-d", "%DIR%", "%INPUT%"],
                )),
                run: CommandTemplate::new("java", &["-cp", "%DIR%", "%NAME%"]),
            },
            Self {
                name: "cpp".to_string(),
                aliases: vec!["c++".to_string(), "cxx".to_string()],
                extension: "cpp".to_string(),
                naming: SourceNaming::default(),
                compile: Some(CommandTemplate::new(
                    "g++",
                    &["-std=c++17", "-O2", "%INPUT%", "-o", "%OUTPUT%"],
                )),
                run: CommandTemplate::new("%OUTPUT%", &[]),
            },
            Self {
                name: "c".to_string(),
                aliases: vec![],
                extension: "c".to_string(),
                naming: SourceNaming::default(),
                compile: Some(CommandTemplate::new(
                    "gcc",
                    &["-std=c11", "-O2", "%INPUT%", "-o", "%OUTPUT%", "-lm"],
                )),
                run: CommandTemplate::new("%OUTPUT%", &[]),
            },
        ]
    }
}

/// Read-only lookup from language identifiers (and aliases) to descriptors
///
/// Built once at startup and shared behind an `Arc`; lookups take no locks.
#[derive(Debug, Clone)]
pub struct Registry {
    toolchains: Vec<ToolchainDescriptor>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new(toolchains: Vec<ToolchainDescriptor>) -> Self {
        let mut index = HashMap::new();
        for (i, toolchain) in toolchains.iter().enumerate() {
            for key in std::iter::once(&toolchain.name).chain(toolchain.aliases.iter()) {
                if let Some(prev) = index.insert(normalize(key), i)
                    && prev != i
                {
                    log::warn!(
                        "Language identifier `{key}` claimed by both {} and {}",
                        toolchains[prev].name,
                        toolchain.name
                    );
                }
            }
        }

        Self { toolchains, index }
    }

    pub fn builtin() -> Self {
        Self::new(ToolchainDescriptor::builtins())
    }

    /// Adds descriptors, replacing any existing one with the same canonical name
    pub fn with_overrides(self, overrides: Vec<ToolchainDescriptor>) -> Self {
        let mut toolchains = self.toolchains;
        for mut toolchain in overrides {
            toolchain.name = normalize(&toolchain.name);
            match toolchains.iter_mut().find(|t| t.name == toolchain.name) {
                Some(existing) => {
                    log::info!("Overriding built-in toolchain {}", toolchain.name);
                    *existing = toolchain;
                }
                None => {
                    log::info!("Registering toolchain {}", toolchain.name);
                    toolchains.push(toolchain);
                }
            }
        }

        Self::new(toolchains)
    }

    pub fn lookup(&self, language: &str) -> Result<&ToolchainDescriptor, ExecError> {
        let key = normalize(language);
        self.index
            .get(&key)
            .map(|&i| &self.toolchains[i])
            .ok_or(ExecError::UnsupportedLanguage(key))
    }

    /// Canonical names, in registration order
    pub fn languages(&self) -> Vec<&str> {
        self.toolchains.iter().map(|t| t.name.as_str()).collect()
    }
}

pub(crate) fn normalize(language: &str) -> String {
    language.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_same_descriptor() {
        let registry = Registry::builtin();
        for (alias, name) in [
            ("py", "python"),
            ("Python", "python"),
            ("JS", "javascript"),
            ("node", "javascript"),
            ("c++", "cpp"),
            ("CPP", "cpp"),
            (" java ", "java"),
            ("c", "c"),
        ] {
            assert_eq!(registry.lookup(alias).unwrap().name, name, "alias {alias}");
        }
    }

    #[test]
    fn test_unknown_language_names_identifier() {
        let registry = Registry::builtin();
        match registry.lookup("COBOL") {
            Err(ExecError::UnsupportedLanguage(name)) => assert_eq!(name, "cobol"),
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }

    #[test]
    fn test_compiled_languages() {
        let registry = Registry::builtin();
        assert!(registry.lookup("java").unwrap().requires_compilation());
        assert!(registry.lookup("c").unwrap().requires_compilation());
        assert!(registry.lookup("cpp").unwrap().requires_compilation());
        assert!(!registry.lookup("python").unwrap().requires_compilation());
        assert!(!registry.lookup("javascript").unwrap().requires_compilation());
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let template = CommandTemplate::new("gcc", &["%INPUT%", "-o", "%OUTPUT%"]);
        let mapping = HashMap::from([
            ("%INPUT%", "/w/main.c".to_string()),
            ("%OUTPUT%", "/w/main".to_string()),
        ]);

        let command = template.render(&mapping);
        assert_eq!(command.program, "gcc");
        assert_eq!(command.args, vec!["/w/main.c", "-o", "/w/main"]);
    }

    #[test]
    fn test_override_replaces_builtin() {
        let registry = Registry::builtin().with_overrides(vec![ToolchainDescriptor {
            name: "Python".to_string(),
            aliases: vec!["py".to_string()],
            extension: "py".to_string(),
            naming: SourceNaming::default(),
            compile: None,
            run: CommandTemplate::new("/opt/python/bin/python3", &["-I", "%INPUT%"]),
        }]);

        assert_eq!(
            registry.lookup("py").unwrap().run.program,
            "/opt/python/bin/python3"
        );
        assert_eq!(registry.languages().len(), 5);
    }

    #[test]
    fn test_class_name_detection() {
        let naming = SourceNaming::ClassName {
            fallback: "Main".to_string(),
        };
        assert_eq!(
            naming.stem("import java.util.*;\npublic class Solution {\n}"),
            "Solution"
        );
        assert_eq!(naming.stem("class Helper {}\npublic final class App{}"), "App");
        assert_eq!(naming.stem("class Main {\n}"), "Main");
        assert_eq!(naming.stem(""), "Main");
        assert_eq!(naming.stem("public class ../../etc {}"), "Main");
    }
}
