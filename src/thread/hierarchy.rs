//! Reply-Hierarchy Reconstruction (spec §4.7): rebuilds the reply tree
//! rooted at a PatchCard's message, and finds a message's ancestor chain.
//! Both walks are substring matches on `in_reply_to_header` (spec §4.2's
//! opaque `urn:uuid:` refs never join a tree, by construction) and are
//! bounded to guard against cyclic or pathological feed data.

use crate::error::Result;
use crate::model::FeedMessage;
use crate::store::Store;

/// BFS frontier expansion is capped at this many rounds regardless of how
/// many replies keep surfacing.
const MAX_BFS_ITERATIONS: usize = 20;

/// Following `in_reply_to_header` upward is capped at this many hops.
const MAX_PARENT_CHAIN_DEPTH: usize = 5;

/// One node of the reconstructed tree: a message plus its direct replies,
/// sorted by `received_at`.
#[derive(Debug, Clone)]
pub struct ReplyNode {
    pub message: FeedMessage,
    pub children: Vec<ReplyNode>,
}

/// Rebuild the full reply tree rooted at `root_message_id_header`. Missing
/// root is not an error here — callers check eligibility beforehand.
pub async fn build_reply_tree(store: &Store, root_message_id_header: &str) -> Result<Option<ReplyNode>> {
    let Some(root) = store.feed_messages.find_by_message_id_header(root_message_id_header).await? else {
        return Ok(None);
    };

    let mut all_replies: Vec<FeedMessage> = Vec::new();
    let mut frontier = vec![root_message_id_header.to_string()];
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    seen.insert(root_message_id_header.to_string());

    for _ in 0..MAX_BFS_ITERATIONS {
        if frontier.is_empty() {
            break;
        }
        let next = store.feed_messages.find_replies_to_any(&frontier).await?;
        let mut next_frontier = Vec::new();
        for message in next {
            if seen.insert(message.message_id_header.clone()) {
                next_frontier.push(message.message_id_header.clone());
                all_replies.push(message);
            }
        }
        frontier = next_frontier;
    }

    Ok(Some(assemble_tree(root, &all_replies)))
}

/// Turn a flat reply list into a tree by repeatedly attaching children
/// whose `in_reply_to_header` matches an already-placed node.
fn assemble_tree(root: FeedMessage, replies: &[FeedMessage]) -> ReplyNode {
    fn attach(node: &mut ReplyNode, replies: &[FeedMessage], placed: &mut std::collections::HashSet<String>) {
        let mut direct: Vec<FeedMessage> = replies
            .iter()
            .filter(|r| {
                !placed.contains(&r.message_id_header)
                    && r.in_reply_to_header.as_deref() == Some(node.message.message_id_header.as_str())
            })
            .cloned()
            .collect();
        direct.sort_by_key(|m| m.received_at);

        for child_message in direct {
            placed.insert(child_message.message_id_header.clone());
            let mut child = ReplyNode { message: child_message, children: Vec::new() };
            attach(&mut child, replies, placed);
            node.children.push(child);
        }
    }

    let mut placed = std::collections::HashSet::new();
    placed.insert(root.message_id_header.clone());
    let mut root_node = ReplyNode { message: root, children: Vec::new() };
    attach(&mut root_node, replies, &mut placed);
    root_node
}

/// Follow `in_reply_to_header` upward from `message_id_header`, returning
/// the chain from the message itself to its furthest resolvable ancestor
/// (bounded at [`MAX_PARENT_CHAIN_DEPTH`] hops).
pub async fn find_ancestor_chain(store: &Store, message_id_header: &str) -> Result<Vec<FeedMessage>> {
    let mut chain = Vec::new();
    let mut current = message_id_header.to_string();

    for _ in 0..MAX_PARENT_CHAIN_DEPTH {
        let Some(message) = store.feed_messages.find_by_message_id_header(&current).await? else {
            break;
        };
        let parent = message.in_reply_to_header.clone();
        chain.push(message);
        match parent {
            Some(parent_id) if parent_id != current => current = parent_id,
            _ => break,
        }
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn msg(header: &str, in_reply_to: Option<&str>, offset_secs: i64) -> FeedMessage {
        FeedMessage {
            id: 0,
            subsystem_name: "linux-mm".into(),
            message_id: header.into(),
            message_id_header: header.into(),
            in_reply_to_header: in_reply_to.map(str::to_string),
            subject: "Re: [PATCH] x".into(),
            author: "a".into(),
            author_email: "a@b".into(),
            content: String::new(),
            url: String::new(),
            received_at: Utc::now() + Duration::seconds(offset_secs),
            is_patch: false,
            is_reply: true,
            is_series_patch: false,
            patch_version: None,
            patch_index: 0,
            patch_total: 0,
            is_cover_letter: false,
            series_message_id: None,
        }
    }

    #[test]
    fn assemble_tree_sorts_children_by_received_at() {
        let root = msg("root", None, 0);
        let replies = vec![msg("c2", Some("root"), 20), msg("c1", Some("root"), 10)];
        let tree = assemble_tree(root, &replies);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].message.message_id_header, "c1");
        assert_eq!(tree.children[1].message.message_id_header, "c2");
    }

    #[test]
    fn assemble_tree_nests_grandchildren() {
        let root = msg("root", None, 0);
        let replies = vec![msg("child", Some("root"), 10), msg("grandchild", Some("child"), 20)];
        let tree = assemble_tree(root, &replies);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(tree.children[0].children[0].message.message_id_header, "grandchild");
    }

    #[test]
    fn assemble_tree_ignores_self_referential_reply() {
        let root = msg("root", None, 0);
        let mut looping = msg("loop", Some("loop"), 5);
        looping.in_reply_to_header = Some("loop".to_string());
        let tree = assemble_tree(root, &[looping]);
        assert!(tree.children.is_empty());
    }
}
