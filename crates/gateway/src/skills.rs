//! Directory-based skill registry.
//!
//! Skills live under `<data_dir>/skills/<name>/SKILL.md`. The first
//! paragraph after the title is the description shown to the model; the
//! full body is returned by `skill.get`.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::Serialize;

use sb_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub path: String,
    #[serde(skip)]
    pub content: String,
}

pub struct SkillRegistry {
    skills_dir: PathBuf,
    skills: RwLock<HashMap<String, SkillInfo>>,
}

impl SkillRegistry {
    pub fn new(skills_dir: PathBuf) -> Self {
        let registry = Self {
            skills_dir,
            skills: RwLock::new(HashMap::new()),
        };
        registry.refresh();
        registry
    }

    /// Rescan the skills directory.
    pub fn refresh(&self) -> usize {
        let mut found = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&self.skills_dir) {
            for entry in entries.flatten() {
                let manifest = entry.path().join("SKILL.md");
                if !manifest.is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                match std::fs::read_to_string(&manifest) {
                    Ok(content) => {
                        found.insert(
                            name.clone(),
                            SkillInfo {
                                name,
                                description: first_paragraph(&content),
                                path: manifest.display().to_string(),
                                content,
                            },
                        );
                    }
                    Err(e) => {
                        tracing::warn!(skill = %name, error = %e, "skipping unreadable skill");
                    }
                }
            }
        }
        let count = found.len();
        *self.skills.write() = found;
        tracing::debug!(count, dir = %self.skills_dir.display(), "skills loaded");
        count
    }

    pub fn list(&self) -> Vec<SkillInfo> {
        let mut skills: Vec<SkillInfo> = self.skills.read().values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    pub fn get(&self, name: &str) -> Result<SkillInfo> {
        self.skills
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("skill '{name}'")))
    }

    /// Drop a skill from the in-memory set (the file stays on disk).
    pub fn remove(&self, name: &str) -> Result<()> {
        if self.skills.write().remove(name).is_none() {
            return Err(Error::NotFound(format!("skill '{name}'")));
        }
        Ok(())
    }

    /// The composition block: one line per skill.
    pub fn context_block(&self) -> String {
        let skills = self.list();
        if skills.is_empty() {
            return String::new();
        }
        let lines: Vec<String> = skills
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect();
        format!("# Available Skills\n\n{}", lines.join("\n"))
    }
}

fn first_paragraph(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .unwrap_or("")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &std::path::Path, name: &str, body: &str) {
        let skill_dir = dir.join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), body).unwrap();
    }

    #[test]
    fn scan_list_get() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "deploy",
            "# Deploy\n\nPush the current branch to staging.\n\nDetails...\n",
        );
        write_skill(dir.path(), "review", "# Review\n\nRun the review checklist.\n");

        let registry = SkillRegistry::new(dir.path().to_path_buf());
        let skills = registry.list();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "deploy");
        assert_eq!(skills[0].description, "Push the current branch to staging.");

        let skill = registry.get("review").unwrap();
        assert!(skill.content.contains("checklist"));
        assert!(registry.get("missing").is_err());
    }

    #[test]
    fn refresh_picks_up_new_skills() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SkillRegistry::new(dir.path().to_path_buf());
        assert!(registry.list().is_empty());

        write_skill(dir.path(), "new-skill", "# New\n\nDoes new things.\n");
        assert_eq!(registry.refresh(), 1);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn remove_is_in_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "gone", "# Gone\n\nTemporary.\n");
        let registry = SkillRegistry::new(dir.path().to_path_buf());

        registry.remove("gone").unwrap();
        assert!(registry.get("gone").is_err());
        // The file survives; a refresh brings it back.
        assert_eq!(registry.refresh(), 1);
    }

    #[test]
    fn context_block_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "a", "# A\n\nFirst skill.\n");
        let registry = SkillRegistry::new(dir.path().to_path_buf());
        let block = registry.context_block();
        assert!(block.starts_with("# Available Skills"));
        assert!(block.contains("- a: First skill."));

        registry.remove("a").unwrap();
        assert!(registry.context_block().is_empty());
    }
}
