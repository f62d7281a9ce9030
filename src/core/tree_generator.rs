//! Generates an ASCII representation of the bundled files.

use std::path::{Component, Path};

/// A utility struct for generating an ASCII directory tree.
///
/// This struct is stateless and provides methods as associated functions.
pub struct TreeGenerator;

impl TreeGenerator {
    /// Renders `relative_paths` below a `root_name/` line.
    ///
    /// Siblings keep the order in which they first appear in the input, so a
    /// list in scan order renders directories and files interleaved exactly as
    /// they were walked.
    pub fn generate_tree<P: AsRef<Path>>(relative_paths: &[P], root_name: &str) -> String {
        let annotated: Vec<(&Path, Option<String>)> = relative_paths
            .iter()
            .map(|p| {
                let path: &Path = p.as_ref();
                (path, None)
            })
            .collect();
        Self::generate_annotated_tree(&annotated, root_name)
    }

    /// Like [`generate_tree`](Self::generate_tree), with an optional note
    /// printed after each file name.
    pub fn generate_annotated_tree<P: AsRef<Path>>(
        files: &[(P, Option<String>)],
        root_name: &str,
    ) -> String {
        let mut root = TreeNode::directory(root_name);
        for (path, note) in files {
            Self::insert_into_tree(&mut root, path.as_ref(), note.clone());
        }

        let mut result = format!("{root_name}/\n");
        Self::render_children(&root.children, &mut result, "");
        result
    }

    /// Inserts a file path, creating intermediate directory nodes on the way.
    fn insert_into_tree(root: &mut TreeNode, path: &Path, note: Option<String>) {
        let names: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let Some((file_name, directories)) = names.split_last() else {
            return;
        };

        let mut current = root;
        for name in directories {
            let index = match current
                .children
                .iter()
                .position(|child| child.is_directory && child.name == *name)
            {
                Some(index) => index,
                None => {
                    current.children.push(TreeNode::directory(name));
                    current.children.len() - 1
                }
            };
            current = &mut current.children[index];
        }

        if !current
            .children
            .iter()
            .any(|child| !child.is_directory && child.name == *file_name)
        {
            current.children.push(TreeNode {
                name: file_name.clone(),
                is_directory: false,
                note,
                children: Vec::new(),
            });
        }
    }

    fn render_children(children: &[TreeNode], result: &mut String, prefix: &str) {
        for (i, node) in children.iter().enumerate() {
            let is_last = i == children.len() - 1;

            let connector = if is_last { "└── " } else { "├── " };
            let icon = if node.is_directory { "📁 " } else { "📄 " };

            match &node.note {
                Some(note) => {
                    result.push_str(&format!("{prefix}{connector}{icon}{} {note}\n", node.name))
                }
                None => result.push_str(&format!("{prefix}{connector}{icon}{}\n", node.name)),
            }

            if !node.children.is_empty() {
                let new_prefix = if is_last {
                    format!("{prefix}    ")
                } else {
                    format!("{prefix}│   ")
                };
                Self::render_children(&node.children, result, &new_prefix);
            }
        }
    }
}

/// A transient node used for building the ASCII tree.
#[derive(Debug, Clone)]
struct TreeNode {
    name: String,
    is_directory: bool,
    note: Option<String>,
    children: Vec<TreeNode>,
}

impl TreeNode {
    fn directory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_directory: true,
            note: None,
            children: Vec::new(),
        }
    }
}
