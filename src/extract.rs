//! Feature extraction for source files.
//!
//! Derives a [`FileFeatures`] record (language, primary symbol and container,
//! imports, complexity) from a file's text. Language comes from the path
//! suffix; Python is parsed with tree-sitter and YAML (Ansible playbooks,
//! role task files) with `serde_yml`.
//!
//! Extraction never fails past this module: a file that cannot be parsed
//! yields empty features for its language, and any other failure yields
//! [`FileFeatures::baseline`]. Both are logged.
//!
//! Symbol selection is last-wins: the primary symbol and container are the
//! last function and class names met during a full pre-order walk, so
//! `def a(): ...` followed by `def b(): ...` reports `b`.

use anyhow::{anyhow, Result};
use serde_yml::Value;
use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

use crate::models::{FileFeatures, Language};

/// Python syntax that adds a branch to the complexity count.
const PY_BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "for_statement",
    "while_statement",
    "try_statement",
    "except_clause",
    "except_group_clause",
];

/// Play keys that hold lists of tasks.
const TASK_SECTIONS: &[&str] = &["pre_tasks", "tasks", "post_tasks", "handlers"];

/// Play keys that distinguish a play from a bare task.
const PLAY_KEYS: &[&str] = &[
    "hosts",
    "roles",
    "pre_tasks",
    "tasks",
    "post_tasks",
    "handlers",
];

/// Task keys whose string value names another file or role.
const IMPORT_KEYS: &[&str] = &[
    "import_playbook",
    "import_tasks",
    "include_tasks",
    "include_vars",
];

/// Nested task lists inside a block task.
const BLOCK_KEYS: &[&str] = &["block", "rescue", "always"];

/// Extract features from `content`, attributed to `file_path`.
pub fn extract(content: &str, file_path: &Path) -> FileFeatures {
    let language = Language::from_path(file_path);
    let outcome = match language {
        Language::Python => extract_python(content),
        Language::Yaml => extract_yaml(content),
        Language::Unknown => return FileFeatures::baseline(),
    };

    match outcome {
        Ok(features) => features,
        Err(e) => {
            tracing::warn!(
                path = %file_path.display(),
                language = language.as_str(),
                error = %e,
                "feature extraction failed; using empty features"
            );
            FileFeatures::empty(language)
        }
    }
}

// ============ Python ============

fn parse_python(content: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| anyhow!("failed to load python grammar: {}", e))?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("python parser returned no tree"))?;
    if tree.root_node().has_error() {
        return Err(anyhow!("python source contains syntax errors"));
    }
    Ok(tree)
}

fn extract_python(content: &str) -> Result<FileFeatures> {
    let tree = parse_python(content)?;
    let source = content.as_bytes();
    let mut features = FileFeatures::empty(Language::Python);
    let mut branches = 0u32;

    let mut cursor = tree.walk();
    'walk: loop {
        let node = cursor.node();
        match node.kind() {
            "function_definition" => {
                if let Some(name) = field_text(node, "name", source) {
                    features.primary_symbol = Some(name);
                }
            }
            "class_definition" => {
                if let Some(name) = field_text(node, "name", source) {
                    features.primary_container = Some(name);
                }
            }
            "import_statement" => collect_import_names(node, source, &mut features.imports),
            "import_from_statement" => {
                if let Some(module) = field_text(node, "module_name", source) {
                    features.imports.push(module);
                }
            }
            kind if PY_BRANCH_KINDS.contains(&kind) => branches += 1,
            _ => {}
        }

        // Pre-order traversal: descend, else advance to the next sibling
        // of the nearest ancestor that has one.
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                continue 'walk;
            }
            if !cursor.goto_parent() {
                break 'walk;
            }
        }
    }

    features.complexity = 1.0 + f64::from(branches);
    Ok(features)
}

fn field_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(|s| s.to_string())
}

/// `import os, a.b as c` contributes `os` and `a.b`.
fn collect_import_names(node: Node<'_>, source: &[u8], out: &mut Vec<String>) {
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        let module = if name.kind() == "aliased_import" {
            field_text(name, "name", source)
        } else {
            name.utf8_text(source).ok().map(|s| s.to_string())
        };
        if let Some(module) = module {
            out.push(module);
        }
    }
}

// ============ YAML (Ansible) ============

#[derive(Default)]
struct PlaybookWalk {
    steps: u64,
    has_steps: bool,
    last_play: Option<String>,
    last_task: Option<String>,
    imports: Vec<String>,
}

impl PlaybookWalk {
    fn visit_top(&mut self, item: &Value, in_sequence: bool) {
        if is_play(item) {
            self.visit_play(item);
        } else if in_sequence && item.is_mapping() {
            self.has_steps = true;
            self.visit_task(item);
        }
    }

    fn visit_play(&mut self, play: &Value) {
        if let Some(name) = play.get("name").and_then(Value::as_str) {
            self.last_play = Some(name.to_string());
        }
        if let Some(roles) = play.get("roles").and_then(Value::as_sequence) {
            for role in roles {
                let role_name = role
                    .as_str()
                    .or_else(|| role.get("role").and_then(Value::as_str))
                    .or_else(|| role.get("name").and_then(Value::as_str));
                if let Some(r) = role_name {
                    self.imports.push(r.to_string());
                }
            }
        }
        for section in TASK_SECTIONS {
            if let Some(tasks) = play.get(*section).and_then(Value::as_sequence) {
                self.has_steps = true;
                for task in tasks {
                    self.visit_task(task);
                }
            }
        }
    }

    fn visit_task(&mut self, task: &Value) {
        if !task.is_mapping() {
            return;
        }
        self.steps += 1;
        if let Some(name) = task.get("name").and_then(Value::as_str) {
            self.last_task = Some(name.to_string());
        }
        for key in IMPORT_KEYS {
            if let Some(target) = task.get(*key).and_then(Value::as_str) {
                self.imports.push(target.to_string());
            }
        }
        for key in ["include_role", "import_role"] {
            if let Some(role) = task.get(key).and_then(|r| r.get("name")).and_then(Value::as_str) {
                self.imports.push(role.to_string());
            }
        }
        for key in BLOCK_KEYS {
            if let Some(nested) = task.get(*key).and_then(Value::as_sequence) {
                for t in nested {
                    self.visit_task(t);
                }
            }
        }
    }
}

fn is_play(item: &Value) -> bool {
    item.as_mapping()
        .map(|m| PLAY_KEYS.iter().any(|k| m.contains_key(*k)))
        .unwrap_or(false)
}

fn extract_yaml(content: &str) -> Result<FileFeatures> {
    let doc: Value = serde_yml::from_str(content)?;
    let mut walk = PlaybookWalk::default();

    match &doc {
        Value::Sequence(items) => {
            for item in items {
                walk.visit_top(item, true);
            }
        }
        Value::Mapping(_) => walk.visit_top(&doc, false),
        _ => {}
    }

    let mut features = FileFeatures::empty(Language::Yaml);
    features.primary_symbol = walk.last_task;
    features.primary_container = walk.last_play;
    features.imports = walk.imports;
    features.complexity = if walk.has_steps {
        walk.steps as f64
    } else {
        1.0
    };
    Ok(features)
}
