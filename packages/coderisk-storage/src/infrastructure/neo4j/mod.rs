//! Neo4j-backed `GraphStore`. Every node is keyed on a repo-scoped natural
//! key and upserted with `MERGE`; edges likewise `MERGE` on their endpoints
//! so reruns are idempotent (§3.3, §5). Node labels and edge types follow §6.
//!
//! Known platform quirk (open question, resolved in DESIGN.md): a `MERGE`
//! that creates zero new nodes still returns success from the driver, so a
//! caller cannot distinguish "already existed" from "driver silently did
//! nothing" purely from the write's return value — Reconcile's node-count
//! comparison against the staging store is the authoritative check, not the
//! write call's apparent success.

use crate::domain::{CoupledBlock, GraphStore, IncidentSummary, OwnershipSummary};
use crate::error::Result;
use async_trait::async_trait;
use coderisk_core::model::{BlockChange, ChangeKind, CodeBlock, Commit, Issue, IssuePRLink, PullRequest};
use neo4rs::{query, Graph};
use std::collections::HashMap;

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await?;
        Ok(Self { graph })
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_commit_node(&self, repo_id: i64, commit: &Commit) -> Result<()> {
        self.graph
            .run(
                query(
                    "MERGE (c:Commit {repo_id: $repo_id, sha: $sha})
                     SET c.author_date = $author_date, c.message = $message, c.topological_index = $topo",
                )
                .param("repo_id", repo_id)
                .param("sha", commit.sha.clone())
                .param("author_date", commit.author_date.to_rfc3339())
                .param("message", commit.message.clone())
                .param("topo", commit.topological_index.map(|v| v as i64).unwrap_or(-1)),
            )
            .await?;
        Ok(())
    }

    async fn upsert_developer_node(&self, repo_id: i64, email: &str, name: &str) -> Result<()> {
        self.graph
            .run(
                query("MERGE (d:Developer {repo_id: $repo_id, email: $email}) SET d.name = $name")
                    .param("repo_id", repo_id)
                    .param("email", email)
                    .param("name", name),
            )
            .await?;
        Ok(())
    }

    async fn upsert_file_node(&self, repo_id: i64, canonical_path: &str) -> Result<()> {
        self.graph
            .run(
                query("MERGE (f:File {repo_id: $repo_id, canonical_path: $path})")
                    .param("repo_id", repo_id)
                    .param("path", canonical_path),
            )
            .await?;
        Ok(())
    }

    async fn upsert_code_block_node(&self, block: &CodeBlock) -> Result<()> {
        self.graph
            .run(
                query(
                    "MERGE (b:CodeBlock {repo_id: $repo_id, canonical_file_path: $path, block_name: $name})
                     SET b.block_type = $block_type, b.language = $language, b.signature = $signature,
                         b.start_line = $start_line, b.end_line = $end_line,
                         b.first_seen_commit_sha = $first_seen, b.last_modified_commit_sha = $last_modified,
                         b.incident_count = $incident_count, b.co_change_count = $co_change_count,
                         b.avg_coupling_rate = $avg_coupling_rate, b.risk_score = $risk_score,
                         b.staleness_days = $staleness_days, b.original_author = $original_author,
                         b.last_modifier = $last_modifier, b.temporal_summary = $temporal_summary",
                )
                .param("repo_id", block.repo_id)
                .param("path", block.canonical_file_path.clone())
                .param("name", block.block_name.clone())
                .param("block_type", format!("{:?}", block.block_type))
                .param("language", block.language.clone())
                .param("signature", block.signature.clone())
                .param("start_line", block.start_line as i64)
                .param("end_line", block.end_line as i64)
                .param("first_seen", block.first_seen_commit_sha.clone())
                .param("last_modified", block.last_modified_commit_sha.clone())
                .param("incident_count", block.risk.incident_count as i64)
                .param("co_change_count", block.risk.co_change_count as i64)
                .param("avg_coupling_rate", block.risk.avg_coupling_rate)
                .param("risk_score", block.risk.risk_score)
                .param("staleness_days", block.risk.staleness_days.unwrap_or(-1))
                .param("original_author", block.risk.original_author.clone().unwrap_or_default())
                .param("last_modifier", block.risk.last_modifier.clone().unwrap_or_default())
                .param("temporal_summary", block.risk.temporal_summary.clone().unwrap_or_default()),
            )
            .await?;
        Ok(())
    }

    async fn upsert_issue_node(&self, issue: &Issue) -> Result<()> {
        self.graph
            .run(
                query(
                    "MERGE (i:Issue {repo_id: $repo_id, number: $number})
                     SET i.title = $title, i.created_at = $created_at",
                )
                .param("repo_id", issue.repo_id)
                .param("number", issue.number as i64)
                .param("title", issue.title.clone())
                .param("created_at", issue.created_at.to_rfc3339()),
            )
            .await?;
        Ok(())
    }

    async fn upsert_pr_node(&self, pr: &PullRequest) -> Result<()> {
        self.graph
            .run(
                query(
                    "MERGE (p:PR {repo_id: $repo_id, number: $number})
                     SET p.title = $title, p.merged_at = $merged_at",
                )
                .param("repo_id", pr.repo_id)
                .param("number", pr.number as i64)
                .param("title", pr.title.clone())
                .param("merged_at", pr.merged_at.map(|d| d.to_rfc3339()).unwrap_or_default()),
            )
            .await?;
        Ok(())
    }

    async fn write_commit_edges(&self, repo_id: i64, commit: &Commit) -> Result<()> {
        self.graph
            .run(
                query(
                    "MATCH (c:Commit {repo_id: $repo_id, sha: $sha})
                     MERGE (d:Developer {repo_id: $repo_id, email: $email})
                     MERGE (d)-[:AUTHORED]->(c)",
                )
                .param("repo_id", repo_id)
                .param("sha", commit.sha.clone())
                .param("email", commit.author_email.clone()),
            )
            .await?;
        for file in &commit.files {
            self.graph
                .run(
                    query(
                        "MATCH (c:Commit {repo_id: $repo_id, sha: $sha})
                         MERGE (f:File {repo_id: $repo_id, canonical_path: $path})
                         MERGE (c)-[:MODIFIED]->(f)",
                    )
                    .param("repo_id", repo_id)
                    .param("sha", commit.sha.clone())
                    .param("path", file.path.clone()),
                )
                .await?;
        }
        Ok(())
    }

    async fn write_issue_pr_link_edge(&self, link: &IssuePRLink) -> Result<()> {
        use coderisk_core::model::LinkClassification;

        let classification = link.classify();
        let edge_type = match classification {
            LinkClassification::FixedBy => "FIXED_BY",
            LinkClassification::AssociatedWith => "ASSOCIATED_WITH",
            LinkClassification::NoLink { .. } => "REFERENCES",
        };
        let classification_label = match &classification {
            LinkClassification::FixedBy => "fixed_by".to_string(),
            LinkClassification::AssociatedWith => "associated_with".to_string(),
            LinkClassification::NoLink { reason } => format!("no_link:{reason}"),
        };
        let cypher = format!(
            "MATCH (i:Issue {{repo_id: $repo_id, number: $issue_number}})
             MATCH (p:PR {{repo_id: $repo_id, number: $pr_number}})
             MERGE (p)-[r:{edge_type}]->(i)
             SET r.classification = $classification, r.confidence = $confidence,
                 r.detection_method = $detection_method, r.rationale = $rationale"
        );
        self.graph
            .run(
                query(&cypher)
                    .param("repo_id", link.repo_id)
                    .param("issue_number", link.issue_number as i64)
                    .param("pr_number", link.pr_number as i64)
                    .param("classification", classification_label)
                    .param("confidence", link.final_confidence())
                    .param("detection_method", format!("{:?}", link.detection_method))
                    .param("rationale", link.rationale.clone()),
            )
            .await?;
        Ok(())
    }

    async fn write_block_change_edge(&self, change: &BlockChange) -> Result<()> {
        let edge_type = match change.change_kind {
            ChangeKind::Create => "CREATED_BLOCK",
            ChangeKind::Modify => "MODIFIED_BLOCK",
            ChangeKind::Delete => "DELETED_BLOCK",
            ChangeKind::Rename => "RENAMED_FROM",
        };
        let cypher = format!(
            "MATCH (c:Commit {{repo_id: $repo_id, sha: $sha}})
             MATCH (b:CodeBlock {{repo_id: $repo_id, canonical_file_path: $path, block_name: $name}})
             MERGE (c)-[:{edge_type}]->(b)"
        );
        self.graph
            .run(
                query(&cypher)
                    .param("repo_id", change.repo_id)
                    .param("sha", change.commit_sha.clone())
                    .param("path", change.canonical_file_path.clone())
                    .param("name", change.block_name.clone()),
            )
            .await?;
        Ok(())
    }

    async fn write_coupling_edge(
        &self,
        repo_id: i64,
        a: (&str, &str),
        b: (&str, &str),
        co_change_count: u32,
        co_change_rate: f64,
        via_import: bool,
    ) -> Result<()> {
        self.graph
            .run(
                query(
                    "MATCH (x:CodeBlock {repo_id: $repo_id, canonical_file_path: $path_a, block_name: $name_a})
                     MATCH (y:CodeBlock {repo_id: $repo_id, canonical_file_path: $path_b, block_name: $name_b})
                     MERGE (x)-[r:CO_CHANGES_WITH]-(y)
                     SET r.co_change_count = $count, r.co_change_rate = $rate, r.via_import = $via_import",
                )
                .param("repo_id", repo_id)
                .param("path_a", a.0)
                .param("name_a", a.1)
                .param("path_b", b.0)
                .param("name_b", b.1)
                .param("count", co_change_count as i64)
                .param("rate", co_change_rate)
                .param("via_import", via_import),
            )
            .await?;
        Ok(())
    }

    async fn write_incident_edge(
        &self,
        repo_id: i64,
        canonical_file_path: &str,
        block_name: &str,
        commit_sha: &str,
        occurred_at: chrono::DateTime<chrono::Utc>,
        summary: &str,
    ) -> Result<()> {
        self.graph
            .run(
                query(
                    "MATCH (c:Commit {repo_id: $repo_id, sha: $sha})
                     MATCH (b:CodeBlock {repo_id: $repo_id, canonical_file_path: $path, block_name: $name})
                     MERGE (c)-[r:INCIDENT]->(b)
                     SET r.occurred_at = $occurred_at, r.summary = $summary",
                )
                .param("repo_id", repo_id)
                .param("sha", commit_sha)
                .param("path", canonical_file_path)
                .param("name", block_name)
                .param("occurred_at", occurred_at.to_rfc3339())
                .param("summary", summary),
            )
            .await?;
        Ok(())
    }

    async fn update_risk_properties(&self, block: &CodeBlock) -> Result<()> {
        self.upsert_code_block_node(block).await
    }

    async fn block_by_file(&self, repo_id: i64, canonical_file_path: &str) -> Result<Vec<CodeBlock>> {
        let mut stream = self
            .graph
            .execute(
                query("MATCH (b:CodeBlock {repo_id: $repo_id, canonical_file_path: $path}) RETURN b")
                    .param("repo_id", repo_id)
                    .param("path", canonical_file_path),
            )
            .await?;
        let mut out = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            if let Ok(block) = row_to_code_block(&row, repo_id) {
                out.push(block);
            }
        }
        Ok(out)
    }

    async fn block_risk(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<CodeBlock>> {
        let mut stream = self
            .graph
            .execute(
                query(
                    "MATCH (b:CodeBlock {repo_id: $repo_id, canonical_file_path: $path, block_name: $name}) RETURN b",
                )
                .param("repo_id", repo_id)
                .param("path", canonical_file_path)
                .param("name", block_name),
            )
            .await?;
        if let Ok(Some(row)) = stream.next().await {
            return Ok(row_to_code_block(&row, repo_id).ok());
        }
        Ok(None)
    }

    async fn coupled_blocks(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<CoupledBlock>> {
        let mut stream = self
            .graph
            .execute(
                query(
                    "MATCH (x:CodeBlock {repo_id: $repo_id, canonical_file_path: $path, block_name: $name})
                     -[r:CO_CHANGES_WITH]-(y:CodeBlock)
                     RETURN y.canonical_file_path AS path, y.block_name AS name,
                            r.co_change_count AS count, r.co_change_rate AS rate, r.via_import AS via_import",
                )
                .param("repo_id", repo_id)
                .param("path", canonical_file_path)
                .param("name", block_name),
            )
            .await?;
        let mut out = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            let path: String = row.get("path").unwrap_or_default();
            let name: String = row.get("name").unwrap_or_default();
            let count: i64 = row.get("count").unwrap_or(0);
            let rate: f64 = row.get("rate").unwrap_or(0.0);
            let via_import: bool = row.get("via_import").unwrap_or(false);
            out.push(CoupledBlock {
                canonical_file_path: path,
                block_name: name,
                co_change_count: count as u32,
                co_change_rate: rate,
                via_import,
            });
        }
        Ok(out)
    }

    async fn incidents_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Vec<IncidentSummary>> {
        let mut stream = self
            .graph
            .execute(
                query(
                    "MATCH (b:CodeBlock {repo_id: $repo_id, canonical_file_path: $path, block_name: $name})
                     <-[r:INCIDENT]-(c:Commit)
                     RETURN c.sha AS sha, r.occurred_at AS occurred_at, r.summary AS summary
                     ORDER BY r.occurred_at DESC",
                )
                .param("repo_id", repo_id)
                .param("path", canonical_file_path)
                .param("name", block_name),
            )
            .await?;
        let mut out = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            let sha: String = row.get("sha").unwrap_or_default();
            let occurred_at_raw: String = row.get("occurred_at").unwrap_or_default();
            let summary: String = row.get("summary").unwrap_or_default();
            let occurred_at = chrono::DateTime::parse_from_rfc3339(&occurred_at_raw)
                .map(|d| d.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now());
            out.push(IncidentSummary { commit_sha: sha, occurred_at, summary });
        }
        Ok(out)
    }

    async fn ownership_for_block(&self, repo_id: i64, canonical_file_path: &str, block_name: &str) -> Result<Option<OwnershipSummary>> {
        let block = self.block_risk(repo_id, canonical_file_path, block_name).await?;
        Ok(block.map(|b| OwnershipSummary {
            original_author: b.risk.original_author,
            last_modifier: b.risk.last_modifier,
            familiarity_map: b.risk.familiarity_map,
        }))
    }

    async fn node_counts(&self, repo_id: i64) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for label in ["Commit", "Developer", "File", "CodeBlock", "Issue", "PR"] {
            let cypher = format!("MATCH (n:{label} {{repo_id: $repo_id}}) RETURN count(n) AS n");
            let mut stream = self.graph.execute(query(&cypher).param("repo_id", repo_id)).await?;
            let n: i64 = if let Ok(Some(row)) = stream.next().await { row.get("n").unwrap_or(0) } else { 0 };
            counts.insert(label.to_lowercase(), n as u64);
        }
        Ok(counts)
    }

    async fn truncate_repo(&self, repo_id: i64) -> Result<()> {
        self.graph
            .run(
                query("MATCH (n {repo_id: $repo_id}) DETACH DELETE n").param("repo_id", repo_id),
            )
            .await?;
        Ok(())
    }
}

fn row_to_code_block(row: &neo4rs::Row, repo_id: i64) -> std::result::Result<CodeBlock, ()> {
    use coderisk_core::model::{BlockType, RiskProperties};
    let node: neo4rs::Node = row.get("b").map_err(|_| ())?;
    let block_type = match node.get::<String>("block_type").unwrap_or_default().as_str() {
        "Method" => BlockType::Method,
        "Class" => BlockType::Class,
        "Component" => BlockType::Component,
        "Enum" => BlockType::Enum,
        "Interface" => BlockType::Interface,
        "Type" => BlockType::Type,
        _ => BlockType::Function,
    };
    Ok(CodeBlock {
        repo_id,
        canonical_file_path: node.get("canonical_file_path").unwrap_or_default(),
        block_name: node.get("block_name").unwrap_or_default(),
        block_type,
        language: node.get("language").unwrap_or_default(),
        start_line: node.get::<i64>("start_line").unwrap_or(0) as u32,
        end_line: node.get::<i64>("end_line").unwrap_or(0) as u32,
        signature: node.get("signature").unwrap_or_default(),
        first_seen_commit_sha: node.get("first_seen_commit_sha").unwrap_or_default(),
        last_modified_commit_sha: node.get("last_modified_commit_sha").unwrap_or_default(),
        risk: RiskProperties {
            incident_count: node.get::<i64>("incident_count").unwrap_or(0) as u32,
            last_incident_date: None,
            temporal_summary: node.get("temporal_summary").ok(),
            original_author: node.get("original_author").ok(),
            last_modifier: node.get("last_modifier").ok(),
            staleness_days: node.get::<i64>("staleness_days").ok().filter(|v| *v >= 0),
            familiarity_map: HashMap::new(),
            co_change_count: node.get::<i64>("co_change_count").unwrap_or(0) as u32,
            avg_coupling_rate: node.get("avg_coupling_rate").unwrap_or(0.0),
            risk_score: node.get("risk_score").unwrap_or(0.0),
        },
    })
}
