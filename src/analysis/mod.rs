//! Static analysis of a cloned submission.
//!
//! Counts agents, tools and workflows in the project's source files (`src/`
//! and any top-level `agents/`, `tools/` or `workflows/` directories alike)
//! and flags sponsor technologies from `package.json` dependencies and
//! source imports. The scan never fails: unreadable files and manifests
//! contribute nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use walkdir::WalkDir;

/// Directories never descended into.
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".mastra",
    ".next",
    "coverage",
];

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Technology flag and the needles that reveal it in dependency names or
/// source text.
const TECHNOLOGY_RULES: &[(&str, &[&str])] = &[
    (
        "web-browsing",
        &["browserbase", "stagehand", "playwright", "puppeteer"],
    ),
    ("mcp", &["@smithery/sdk", "@mastra/mcp"]),
    ("arcade", &["@arcadeai/arcadejs", "arcade-ai"]),
    ("auth", &["@workos-inc/node"]),
    ("rag", &["chromadb", "@mastra/rag"]),
    ("blockchain", &["@recallnet/", "ethers", "viem"]),
    ("evals", &["deepeval", "@mastra/evals", "confident-ai"]),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub count: u32,
}

/// Agent, tool and workflow counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub agents: Count,
    pub tools: Count,
    pub workflows: Count,
}

/// Result of [`analyze`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub architecture: Architecture,
    pub detected_technologies: BTreeMap<String, bool>,
}

impl Stats {
    pub fn has_technology(&self, flag: &str) -> bool {
        self.detected_technologies.get(flag).copied().unwrap_or(false)
    }
}

/// Scan `root` and report architecture counts and technology flags.
pub fn analyze(root: &Path) -> Stats {
    let dependencies = read_dependencies(root);

    let mut architecture = Architecture::default();
    let mut source_hits: BTreeSet<&'static str> = BTreeSet::new();

    for path in source_files(root) {
        let text = std::fs::read_to_string(&path).unwrap_or_default();
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let has_segment = |segment: &str| {
            rel.parent()
                .map(|p| p.components().any(|c| c.as_os_str() == segment))
                .unwrap_or(false)
        };

        if has_segment("agents") || text.contains("new Agent(") {
            architecture.agents.count += 1;
        }
        if has_segment("tools") || text.contains("createTool(") {
            architecture.tools.count += 1;
        }
        if has_segment("workflows") || text.contains("createWorkflow(") {
            architecture.workflows.count += 1;
        }

        for (flag, needles) in TECHNOLOGY_RULES {
            if needles.iter().any(|needle| text.contains(needle)) {
                source_hits.insert(*flag);
            }
        }
    }

    let detected_technologies = TECHNOLOGY_RULES
        .iter()
        .map(|(flag, needles)| {
            let in_deps = dependencies
                .iter()
                .any(|dep| needles.iter().any(|needle| dep.contains(needle)));
            (flag.to_string(), in_deps || source_hits.contains(flag))
        })
        .collect();

    let stats = Stats {
        architecture,
        detected_technologies,
    };
    tracing::debug!(
        root = %root.display(),
        agents = stats.architecture.agents.count,
        tools = stats.architecture.tools.count,
        workflows = stats.architecture.workflows.count,
        "Static analysis complete"
    );
    stats
}

/// Names from `dependencies` and `devDependencies`; empty on any error.
fn read_dependencies(root: &Path) -> BTreeSet<String> {
    let Ok(content) = std::fs::read_to_string(root.join("package.json")) else {
        return BTreeSet::new();
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&content) else {
        tracing::debug!(root = %root.display(), "Unparseable package.json, ignoring");
        return BTreeSet::new();
    };

    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| manifest.get(key).and_then(|v| v.as_object()))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

fn source_files(root: &Path) -> Vec<std::path::PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .map(|name| e.file_type().is_dir() && EXCLUDED_DIRS.contains(&name))
                    .unwrap_or(false)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(base: &Path, rel: &str, content: &str) {
        let path = base.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_counts_by_segment_and_pattern() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();

        write(base, "src/mastra/agents/weather.ts", "export const a = 1;");
        write(base, "src/mastra/agents/travel.ts", "new Agent({ name: 'travel' })");
        write(
            base,
            "src/mastra/index.ts",
            "const w = createWorkflow({}); const t = createTool({});",
        );
        write(base, "src/mastra/tools/search.ts", "export const search = createTool({});");
        write(base, "src/mastra/agents/README.md", "new Agent(");
        write(base, "src/node_modules/pkg/agents/x.js", "new Agent(");
        write(base, "node_modules/@mastra/core/agents/agent.js", "new Agent(");
        write(base, "agents/outside-src.ts", "export const x = 1;");

        let stats = analyze(base);
        assert_eq!(stats.architecture.agents.count, 3);
        assert_eq!(stats.architecture.tools.count, 2);
        assert_eq!(stats.architecture.workflows.count, 1);
    }

    #[test]
    fn test_top_level_agents_dir_counts_with_src() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "agents/foo.ts", "export const foo = 1;");
        write(dir.path(), "src/bar.ts", "export const bar = new Agent({});");

        let stats = analyze(dir.path());
        assert_eq!(stats.architecture.agents.count, 2);
        assert_eq!(stats.architecture.tools.count, 0);
    }

    #[test]
    fn test_file_counted_once_per_category() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "src/agents/multi.ts",
            "new Agent({}); new Agent({}); new Agent({});",
        );
        let stats = analyze(dir.path());
        assert_eq!(stats.architecture.agents.count, 1);
    }

    #[test]
    fn test_missing_src_and_manifest() {
        let dir = TempDir::new().unwrap();
        let stats = analyze(dir.path());

        assert_eq!(stats.architecture, Architecture::default());
        assert_eq!(stats.detected_technologies.len(), TECHNOLOGY_RULES.len());
        assert!(stats.detected_technologies.values().all(|v| !v));
    }

    #[test]
    fn test_technology_flags_from_manifest_and_source() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        write(
            base,
            "package.json",
            r#"{
                "dependencies": {"@mastra/core": "1.0.0", "@browserbasehq/stagehand": "2.0.0"},
                "devDependencies": {"@mastra/evals": "0.1.0"}
            }"#,
        );
        write(
            base,
            "src/mastra/tools/chain.ts",
            "import { RecallClient } from '@recallnet/sdk/client';",
        );

        let stats = analyze(base);
        assert!(stats.has_technology("web-browsing"));
        assert!(stats.has_technology("evals"));
        assert!(stats.has_technology("blockchain"));
        assert!(!stats.has_technology("mcp"));
        assert!(!stats.has_technology("auth"));
    }

    #[test]
    fn test_unparseable_manifest_is_ignored() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", "{ not json");
        write(dir.path(), "src/workflows/flow.ts", "export {}");

        let stats = analyze(dir.path());
        assert_eq!(stats.architecture.workflows.count, 1);
        assert!(!stats.has_technology("rag"));
    }

    #[test]
    fn test_stats_serialization_shape() {
        let stats = Stats::default();
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("detectedTechnologies").is_some());
        assert_eq!(json["architecture"]["agents"]["count"], 0);
    }
}
