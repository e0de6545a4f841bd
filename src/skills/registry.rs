//! In-memory skill catalog.

use std::collections::HashMap;
use std::path::Path;

use crate::skills::loader::load_skill_file;
use crate::skills::schema::SkillDefinition;

/// Catalog of loaded skill definitions.
///
/// Read-only after loading and safe to share behind an `Arc` across
/// concurrent device runs. Iteration order is insertion order so router
/// scoring stays deterministic. Load failures accumulate in `errors`
/// without aborting the scan.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: Vec<SkillDefinition>,
    index: HashMap<String, usize>,
    pub errors: Vec<String>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; a skill with the same id is replaced in place,
    /// keeping its original position in iteration order.
    pub fn register(&mut self, skill: SkillDefinition) {
        match self.index.get(&skill.skill_id) {
            Some(&slot) => self.skills[slot] = skill,
            None => {
                self.index.insert(skill.skill_id.clone(), self.skills.len());
                self.skills.push(skill);
            }
        }
    }

    pub fn get(&self, skill_id: &str) -> Option<&SkillDefinition> {
        self.index.get(skill_id).map(|&slot| &self.skills[slot])
    }

    pub fn list(&self) -> &[SkillDefinition] {
        &self.skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn list_by_level(&self, level: i64) -> Vec<&SkillDefinition> {
        self.skills.iter().filter(|s| s.level() == Some(level)).collect()
    }

    pub fn list_by_role(&self, role: &str) -> Vec<&SkillDefinition> {
        self.skills.iter().filter(|s| s.role() == Some(role)).collect()
    }

    pub fn list_by_owner(&self, owner: &str) -> Vec<&SkillDefinition> {
        self.skills.iter().filter(|s| s.owner() == Some(owner)).collect()
    }

    /// Load skills from a set of files or directories (recursive).
    pub fn load_from_paths<P: AsRef<Path>>(&mut self, paths: &[P]) {
        for path in paths {
            self.load_path(path.as_ref());
        }
    }

    fn load_path(&mut self, path: &Path) {
        if path.is_dir() {
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    self.errors.push(format!("{}: {}", path.display(), e));
                    return;
                }
            };
            let mut children: Vec<_> = entries.flatten().map(|e| e.path()).collect();
            children.sort();
            for child in children {
                if child.is_dir() {
                    self.load_path(&child);
                } else if is_skill_file(&child) {
                    self.load_file(&child);
                }
            }
        } else if path.is_file() {
            self.load_file(path);
        }
    }

    fn load_file(&mut self, path: &Path) {
        match load_skill_file(path) {
            Ok(skill) => {
                tracing::debug!("loaded skill '{}' from {}", skill.skill_id, path.display());
                self.register(skill);
            }
            Err(e) => {
                tracing::warn!("skipping skill file {}: {}", path.display(), e);
                self.errors.push(format!("{}: {}", path.display(), e));
            }
        }
    }
}

fn is_skill_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml") | Some("json")
    )
}
