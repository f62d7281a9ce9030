//! A short architectural summary of the bundled files, derived from paths alone.

use std::path::Path;

const ENTRY_POINT_NAMES: &[&str] = &[
    "main.rs", "main.go", "main.py", "app.py", "run.py", "server.py", "index.js", "index.ts",
    "app.js", "app.ts",
];

/// File groups counted under "Components", keyed by extension.
const COMPONENT_GROUPS: &[(&str, &[&str])] = &[
    ("Rust modules", &["rs"]),
    ("Python modules", &["py", "pyw"]),
    ("JavaScript/TypeScript", &["js", "ts", "jsx", "tsx"]),
    ("Configuration files", &["json", "yaml", "yml", "toml", "ini", "cfg"]),
    ("Documentation", &["md", "rst", "txt"]),
];

const UI_DIRS: &[&str] = &["ui", "frontend", "web", "client"];
const API_DIRS: &[&str] = &["api", "server", "backend"];

/// What a reader learns about a project before reading any file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProjectOverview {
    pub technologies: Vec<&'static str>,
    /// Non-empty component groups with their file counts.
    pub components: Vec<(&'static str, usize)>,
    pub characteristics: Vec<&'static str>,
    /// Paths of well-known entry files, in input order.
    pub entry_points: Vec<String>,
}

impl ProjectOverview {
    /// Summarizes `/`-separated relative paths. The result depends only on
    /// the paths and their order.
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let paths: Vec<&Path> = paths.iter().map(|p| Path::new(p.as_ref())).collect();

        let components: Vec<(&'static str, usize)> = COMPONENT_GROUPS
            .iter()
            .map(|(label, extensions)| {
                let count = paths
                    .iter()
                    .filter(|p| extension(p).is_some_and(|ext| extensions.contains(&ext.as_str())))
                    .count();
                (*label, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();
        let count_of = |label: &str| {
            components
                .iter()
                .find(|(l, _)| *l == label)
                .map_or(0, |(_, count)| *count)
        };

        let has_file = |names: &[&str]| paths.iter().any(|p| names.contains(&file_name(p).as_str()));
        let mut technologies = Vec::new();
        if count_of("Rust modules") > 0 {
            technologies.push("Rust");
        }
        if count_of("Python modules") > 0 {
            technologies.push("Python");
        }
        if count_of("JavaScript/TypeScript") > 0 {
            technologies.push("JavaScript/TypeScript");
        }
        if has_file(&["cargo.toml"]) {
            technologies.push("Cargo");
        }
        if has_file(&["requirements.txt", "pyproject.toml"]) {
            technologies.push("pip/Poetry");
        }
        if has_file(&["package.json"]) {
            technologies.push("npm/Node.js");
        }
        if paths
            .iter()
            .any(|p| file_name(p).contains("dockerfile") || file_name(p).starts_with("docker-compose"))
        {
            technologies.push("Docker");
        }

        let in_dir = |names: &[&str]| {
            paths.iter().any(|p| {
                p.parent()
                    .into_iter()
                    .flat_map(Path::components)
                    .any(|c| names.contains(&c.as_os_str().to_string_lossy().to_lowercase().as_str()))
            })
        };
        let mut characteristics = Vec::new();
        match (in_dir(UI_DIRS), in_dir(API_DIRS)) {
            (true, true) => characteristics.push("Full-stack application (UI + API)"),
            (true, false) => characteristics.push("Frontend/UI focused application"),
            (false, true) => characteristics.push("Backend/API focused application"),
            (false, false) => characteristics.push("Library or utility project"),
        }
        if paths.iter().any(|p| {
            p.components()
                .any(|c| c.as_os_str().to_string_lossy().to_lowercase().contains("test"))
        }) {
            characteristics.push("Includes test suite");
        }
        if count_of("Documentation") > 0 {
            characteristics.push("Documented codebase");
        }

        let entry_points = paths
            .iter()
            .filter(|p| ENTRY_POINT_NAMES.contains(&file_name(p).as_str()))
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        Self {
            technologies,
            components,
            characteristics,
            entry_points,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.technologies.is_empty() {
            out.push_str(&format!("Primary technologies: {}\n", self.technologies.join(", ")));
        }
        if !self.components.is_empty() {
            out.push_str("Components:\n");
            for (label, count) in &self.components {
                let noun = if *count == 1 { "file" } else { "files" };
                out.push_str(&format!("- {label}: {count} {noun}\n"));
            }
        }
        out.push_str("Characteristics:\n");
        for characteristic in &self.characteristics {
            out.push_str(&format!("- {characteristic}\n"));
        }
        if !self.entry_points.is_empty() {
            out.push_str("Entry points:\n");
            for entry in &self.entry_points {
                out.push_str(&format!("- {entry}\n"));
            }
        }
        out
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}
