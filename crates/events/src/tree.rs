//! Compact tree views over the event DAG for client visualization.

use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::store::EventStore;

/// A compact node in the visualization tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: String,
    /// 100-char summary of the payload.
    pub summary: String,
    pub has_children: bool,
    pub child_count: usize,
    pub depth: u32,
    pub is_branch_point: bool,
    pub is_head: bool,
}

/// Direction to walk from the anchor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtreeDirection {
    Descendants,
    Ancestors,
    Both,
}

/// A branch (fork) departing from a session's chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub branch_point_event_id: String,
    pub child_session_id: String,
    pub root_event_id: String,
}

impl EventStore {
    /// Walk the DAG around `event_id` producing compact nodes.
    pub fn get_subtree(
        &self,
        event_id: &str,
        max_depth: u32,
        direction: SubtreeDirection,
    ) -> StoreResult<Vec<TreeNode>> {
        let anchor = self
            .get_event(event_id)?
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;

        let mut nodes = Vec::new();
        nodes.push(self.tree_node(&anchor, 0)?);

        if matches!(direction, SubtreeDirection::Ancestors | SubtreeDirection::Both) {
            let mut depth = 0u32;
            let mut cursor = anchor.parent_id.clone();
            while let Some(id) = cursor {
                depth += 1;
                if depth > max_depth {
                    break;
                }
                let event = self
                    .get_event(&id)?
                    .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;
                cursor = event.parent_id.clone();
                nodes.push(self.tree_node(&event, depth)?);
            }
        }

        if matches!(direction, SubtreeDirection::Descendants | SubtreeDirection::Both) {
            // Breadth-first over children.
            let mut frontier = vec![(anchor.id.clone(), 0u32)];
            while let Some((id, depth)) = frontier.pop() {
                if depth >= max_depth {
                    continue;
                }
                for child in self.get_children(&id)? {
                    nodes.push(self.tree_node(&child, depth + 1)?);
                    frontier.push((child.id.clone(), depth + 1));
                }
            }
        }

        Ok(nodes)
    }

    /// All forks departing from a session's chain.
    pub fn get_branches(&self, session_id: &str) -> StoreResult<Vec<BranchInfo>> {
        self.get_session(session_id)?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.parent_id, e.session_id, e.id
                 FROM events e
                 JOIN events p ON p.id = e.parent_id
                 WHERE p.session_id = ?1 AND e.session_id != ?1
                 ORDER BY e.id ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![session_id], |row| {
                Ok(BranchInfo {
                    branch_point_event_id: row.get(0)?,
                    child_session_id: row.get(1)?,
                    root_event_id: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    fn tree_node(&self, event: &crate::event::Event, depth: u32) -> StoreResult<TreeNode> {
        let children = self.get_children(&event.id)?;
        let head = self
            .get_session(&event.session_id)?
            .and_then(|s| s.head_event_id);
        Ok(TreeNode {
            id: event.id.clone(),
            parent_id: event.parent_id.clone(),
            session_id: event.session_id.clone(),
            event_type: event.event_type().as_str().to_owned(),
            timestamp: event.timestamp.to_rfc3339(),
            summary: event.payload.summary(),
            has_children: !children.is_empty(),
            child_count: children.len(),
            depth,
            is_branch_point: children.len() > 1,
            is_head: head.as_deref() == Some(event.id.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{EventPayload, MessageUserPayload};
    use sb_domain::message::ContentBlock;

    fn user_msg(text: &str) -> EventPayload {
        EventPayload::MessageUser(MessageUserPayload {
            content: vec![ContentBlock::Text { text: text.into() }],
        })
    }

    #[test]
    fn subtree_ancestors_bounded_by_depth() {
        let store = EventStore::open_in_memory().unwrap();
        let (session, _) = store
            .create_session("/tmp/t", "/tmp/t", "m", None)
            .unwrap();
        store.append(&session.id, user_msg("one")).unwrap();
        let head = store.append(&session.id, user_msg("two")).unwrap();

        let nodes = store
            .get_subtree(&head.id, 1, SubtreeDirection::Ancestors)
            .unwrap();
        // anchor + one ancestor.
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].is_head);
        assert_eq!(nodes[1].depth, 1);
    }

    #[test]
    fn branch_point_flags() {
        let store = EventStore::open_in_memory().unwrap();
        let (session, _) = store
            .create_session("/tmp/t", "/tmp/t", "m", None)
            .unwrap();
        let at = store.append(&session.id, user_msg("fork here")).unwrap();
        store.append(&session.id, user_msg("later")).unwrap();
        let (child, _) = store.fork(&session.id, Some(&at.id), None, None).unwrap();

        let nodes = store
            .get_subtree(&at.id, 1, SubtreeDirection::Both)
            .unwrap();
        let anchor = &nodes[0];
        assert!(anchor.is_branch_point);
        assert_eq!(anchor.child_count, 2);

        let branches = store.get_branches(&session.id).unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].child_session_id, child.id);
        assert_eq!(branches[0].branch_point_event_id, at.id);
    }
}
