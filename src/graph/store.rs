//! SQLite-backed `GraphStore`.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashSet, VecDeque};

use crate::db::Db;
use crate::error::{Result, TxgraphError};
use crate::graph::{
    FrontierEntry, GraphStore, GroupRecord, NodeLabel, RelationType, TraversalMap,
    TraverseRequest, TreatmentType,
};

/// Children of one node plus their classification flags.
/// `?3` is the relation filter; NULL follows every relation.
const CHILDREN_SQL: &str = "\
    SELECT e.source_name, e.source_label, \
        EXISTS(SELECT 1 FROM edges c \
               WHERE c.target_name = e.source_name AND c.target_label = e.source_label \
                 AND (?3 IS NULL OR c.relation_type = ?3)), \
        EXISTS(SELECT 1 FROM edges r \
               WHERE r.target_name = e.source_name AND r.target_label = e.source_label \
                 AND r.relation_type = 'RECOMMENDED_FOR' AND r.source_label = 'TREATMENT'), \
        EXISTS(SELECT 1 FROM edges g \
               WHERE g.target_name = e.source_name AND g.target_label = e.source_label \
                 AND g.relation_type = 'PRIMARY_ENTITY' AND g.source_label = 'GUIDELINE') \
    FROM edges e \
    WHERE e.target_name = ?1 AND e.target_label = ?2 \
      AND (?3 IS NULL OR e.relation_type = ?3) \
    ORDER BY e.source_name, e.source_label";

/// `IS_TYPE_OF` children of a treatment, strongest recommendation first.
const TYPE_CHILDREN_SQL: &str = "\
    SELECT e.source_name, COALESCE(MAX(r.weight), 0) AS strength \
    FROM edges e \
    LEFT JOIN edges r \
      ON r.source_name = e.source_name AND r.source_label = e.source_label \
     AND r.relation_type = 'RECOMMENDED_FOR' \
    WHERE e.target_name = ?1 AND e.target_label = 'TREATMENT' \
      AND e.source_label = 'TREATMENT' AND e.relation_type = 'IS_TYPE_OF' \
    GROUP BY e.source_name \
    ORDER BY strength DESC, e.source_name";

const TYPE_PARENT_SQL: &str = "\
    SELECT target_name FROM edges \
    WHERE source_name = ?1 AND source_label = 'TREATMENT' AND relation_type = 'IS_TYPE_OF' \
    ORDER BY target_name LIMIT 1";

/// Graph store over the `nodes` / `edges` tables.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    db: Db,
}

impl SqliteGraphStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Count nodes and edges, for verification and logging.
    pub async fn counts(&self) -> Result<(usize, usize)> {
        self.db
            .with_connection(|conn| {
                let nodes: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
                let edges: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
                Ok((nodes as usize, edges as usize))
            })
            .await
            .map_err(TxgraphError::into_unavailable)
    }

    /// Configured roots with no CONSIDERATION node behind them.
    pub async fn missing_roots(&self, roots: &[String]) -> Result<Vec<String>> {
        let roots = roots.to_vec();
        self.db
            .with_connection(move |conn| {
                let mut missing = Vec::new();
                for root in roots {
                    if !node_exists(conn, &root, NodeLabel::Consideration.as_str())? {
                        missing.push(root);
                    }
                }
                Ok(missing)
            })
            .await
            .map_err(TxgraphError::into_unavailable)
    }
}

fn node_exists(conn: &Connection, name: &str, label: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM nodes WHERE name = ?1 AND label = ?2",
            params![name, label],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Breadth-first walk over incoming edges. Every child is reported under each
/// parent it hangs from, but each node is expanded at most once, so cycles in
/// the stored data cannot loop.
fn traverse_blocking(conn: &Connection, request: &TraverseRequest) -> Result<TraversalMap> {
    if !node_exists(conn, &request.start, request.label.as_str())? {
        return Err(TxgraphError::NodeNotFound {
            name: request.start.clone(),
            label: request.label.to_string(),
        });
    }

    let relation = request.relation.map(|r| r.as_str());
    let mut stmt = conn.prepare(CHILDREN_SQL)?;

    let mut result = TraversalMap::new();
    let mut visited: HashSet<(String, String)> = HashSet::new();
    let mut queue = VecDeque::new();

    let start_label = request.label.as_str().to_string();
    visited.insert((request.start.clone(), start_label.clone()));
    queue.push_back((request.start.clone(), start_label, 0usize));

    while let Some((name, label, depth)) = queue.pop_front() {
        if depth >= request.depth {
            continue;
        }

        let rows = stmt.query_map(params![name, label, relation], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut children: Vec<FrontierEntry> = Vec::new();
        for row in rows {
            let (child, child_label, has_children, has_recommendations, has_excerpts) = row?;
            if !children.iter().any(|c| c.node == child) {
                children.push(FrontierEntry {
                    node: child.clone(),
                    has_children,
                    has_recommendations,
                    has_excerpts,
                });
            }
            if visited.insert((child.clone(), child_label.clone())) {
                queue.push_back((child, child_label, depth + 1));
            }
        }

        if !children.is_empty() {
            result.entry(name).or_default().extend(children);
        }
    }

    Ok(result)
}

fn group_blocking(
    conn: &Connection,
    names: &[String],
    treatment_type: TreatmentType,
) -> Result<Vec<GroupRecord>> {
    let in_set: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    let mut typed = conn.prepare(
        "SELECT 1 FROM nodes WHERE name = ?1 AND label = 'TREATMENT' AND treatment_type = ?2",
    )?;
    let mut children_stmt = conn.prepare(TYPE_CHILDREN_SQL)?;
    let mut parent_stmt = conn.prepare(TYPE_PARENT_SQL)?;

    let mut records = Vec::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            continue;
        }
        let matches = typed
            .query_row(params![name, treatment_type.as_str()], |_| Ok(()))
            .optional()?
            .is_some();
        if !matches {
            continue;
        }

        let children = children_stmt
            .query_map(params![name], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|child| in_set.contains(child.as_str()))
            .collect();

        let parent = parent_stmt
            .query_row(params![name], |row| row.get::<_, String>(0))
            .optional()?
            .filter(|parent| !in_set.contains(parent.as_str()));

        records.push(GroupRecord {
            name: name.clone(),
            children,
            parent,
        });
    }

    Ok(records)
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn traverse(&self, request: &TraverseRequest) -> Result<TraversalMap> {
        if request.depth == 0 {
            return Err(TxgraphError::InvalidInput(
                "traversal depth must be at least 1".to_string(),
            ));
        }
        let request = request.clone();
        log::debug!(
            "traverse start={} label={} relation={:?} depth={}",
            request.start,
            request.label,
            request.relation.map(|r| r.as_str()),
            request.depth
        );
        self.db
            .with_connection(move |conn| traverse_blocking(conn, &request))
            .await
            .map_err(TxgraphError::into_unavailable)
    }

    async fn group_by_relation(
        &self,
        names: &[String],
        treatment_type: TreatmentType,
    ) -> Result<Vec<GroupRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let names = names.to_vec();
        self.db
            .with_connection(move |conn| group_blocking(conn, &names, treatment_type))
            .await
            .map_err(TxgraphError::into_unavailable)
    }
}
