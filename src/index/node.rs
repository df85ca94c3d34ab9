use crate::file::{PAGE_SIZE, PageId};
use crate::record::RecordId;

use super::error::{IndexError, IndexResult};

/// Index key type
pub type Key = i64;

/// Node discriminants as stored in the first word of a page
const INTERNAL_TAG: i64 = 0;
const LEAF_TAG: i64 = 1;

const WORD: usize = 8;
/// tag, parent, prev, next, count
const LEAF_HEADER_WORDS: usize = 5;
/// key, rid page, rid slot
const LEAF_ENTRY_WORDS: usize = 3;
/// tag, parent, count
const INTERNAL_HEADER_WORDS: usize = 3;
/// key, child page
const INTERNAL_ENTRY_WORDS: usize = 2;

/// One B+ tree node, stored in one page.
///
/// Internal entries pair each child page with the maximum key reachable
/// through it. Leaf entries are sorted by key; equal keys keep insertion
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Leaf {
        parent: PageId,
        prev: Option<PageId>,
        next: Option<PageId>,
        entries: Vec<(Key, RecordId)>,
    },
    Internal {
        parent: PageId,
        entries: Vec<(Key, PageId)>,
    },
}

/// Index of the first entry with key >= `key`
pub fn lower_bound<T>(entries: &[(Key, T)], key: Key) -> usize {
    entries.partition_point(|(k, _)| *k < key)
}

/// Index of the first entry with key > `key`
pub fn upper_bound<T>(entries: &[(Key, T)], key: Key) -> usize {
    entries.partition_point(|(k, _)| *k <= key)
}

impl TreeNode {
    pub fn new_leaf(parent: PageId) -> Self {
        TreeNode::Leaf {
            parent,
            prev: None,
            next: None,
            entries: Vec::new(),
        }
    }

    pub fn new_internal(parent: PageId) -> Self {
        TreeNode::Internal {
            parent,
            entries: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    pub fn parent(&self) -> PageId {
        match self {
            TreeNode::Leaf { parent, .. } | TreeNode::Internal { parent, .. } => *parent,
        }
    }

    pub fn set_parent(&mut self, page: PageId) {
        match self {
            TreeNode::Leaf { parent, .. } | TreeNode::Internal { parent, .. } => *parent = page,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TreeNode::Leaf { entries, .. } => entries.len(),
            TreeNode::Internal { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest key stored in (or below) this node
    pub fn max_key(&self) -> Option<Key> {
        match self {
            TreeNode::Leaf { entries, .. } => entries.last().map(|e| e.0),
            TreeNode::Internal { entries, .. } => entries.last().map(|e| e.0),
        }
    }

    /// Bytes the node occupies when serialized
    pub fn serialized_size(&self) -> usize {
        match self {
            TreeNode::Leaf { entries, .. } => {
                (LEAF_HEADER_WORDS + LEAF_ENTRY_WORDS * entries.len()) * WORD
            }
            TreeNode::Internal { entries, .. } => {
                (INTERNAL_HEADER_WORDS + INTERNAL_ENTRY_WORDS * entries.len()) * WORD
            }
        }
    }

    /// The node no longer fits in a page and must be split
    pub fn overflows(&self) -> bool {
        self.serialized_size() > PAGE_SIZE
    }

    /// Move the upper half of the entries into a new node for
    /// `sibling_page`. A leaf sibling is linked between `self_page` and its
    /// old successor; the caller fixes up that successor's `prev`.
    pub fn split(&mut self, self_page: PageId, sibling_page: PageId) -> TreeNode {
        match self {
            TreeNode::Leaf {
                parent,
                next,
                entries,
                ..
            } => {
                let right = entries.split_off(entries.len() / 2);
                let sibling = TreeNode::Leaf {
                    parent: *parent,
                    prev: Some(self_page),
                    next: *next,
                    entries: right,
                };
                *next = Some(sibling_page);
                sibling
            }
            TreeNode::Internal { parent, entries } => {
                let right = entries.split_off(entries.len() / 2);
                TreeNode::Internal {
                    parent: *parent,
                    entries: right,
                }
            }
        }
    }

    /// Encode into a zero-padded page of little-endian `i64` words
    pub fn to_page(&self) -> Vec<u8> {
        let mut words: Vec<i64> = Vec::with_capacity(self.serialized_size() / WORD);
        match self {
            TreeNode::Leaf {
                parent,
                prev,
                next,
                entries,
            } => {
                words.extend([
                    LEAF_TAG,
                    *parent as i64,
                    prev.unwrap_or(0) as i64,
                    next.unwrap_or(0) as i64,
                    entries.len() as i64,
                ]);
                for (key, rid) in entries {
                    words.extend([*key, rid.page_id as i64, rid.slot_id as i64]);
                }
            }
            TreeNode::Internal { parent, entries } => {
                words.extend([INTERNAL_TAG, *parent as i64, entries.len() as i64]);
                for (key, child) in entries {
                    words.extend([*key, *child as i64]);
                }
            }
        }

        let mut page = vec![0u8; PAGE_SIZE.max(words.len() * WORD)];
        for (chunk, word) in page.chunks_exact_mut(WORD).zip(&words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        page
    }

    /// Decode the node stored in `page`
    pub fn from_page(page_id: PageId, page: &[u8]) -> IndexResult<Self> {
        let mut reader = WordReader { page_id, page, pos: 0 };

        match reader.word()? {
            LEAF_TAG => {
                let parent = reader.page()?;
                let prev = Some(reader.page()?).filter(|&p| p != 0);
                let next = Some(reader.page()?).filter(|&p| p != 0);
                let count = reader.count(LEAF_HEADER_WORDS, LEAF_ENTRY_WORDS)?;

                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = reader.word()?;
                    let rid = RecordId::new(reader.page()?, reader.page()?);
                    entries.push((key, rid));
                }
                check_sorted(page_id, &entries)?;

                Ok(TreeNode::Leaf {
                    parent,
                    prev,
                    next,
                    entries,
                })
            }
            INTERNAL_TAG => {
                let parent = reader.page()?;
                let count = reader.count(INTERNAL_HEADER_WORDS, INTERNAL_ENTRY_WORDS)?;

                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push((reader.word()?, reader.page()?));
                }
                check_sorted(page_id, &entries)?;

                Ok(TreeNode::Internal { parent, entries })
            }
            tag => Err(IndexError::InvalidNodeType { page: page_id, tag }),
        }
    }
}

fn check_sorted<T>(page_id: PageId, entries: &[(Key, T)]) -> IndexResult<()> {
    if entries.windows(2).any(|w| w[0].0 > w[1].0) {
        return Err(IndexError::corrupted(page_id, "keys out of order"));
    }
    Ok(())
}

/// Sequential reader over the words of a node page
struct WordReader<'a> {
    page_id: PageId,
    page: &'a [u8],
    pos: usize,
}

impl WordReader<'_> {
    fn word(&mut self) -> IndexResult<i64> {
        let bytes = self
            .page
            .get(self.pos..self.pos + WORD)
            .ok_or_else(|| IndexError::corrupted(self.page_id, "truncated page"))?;
        self.pos += WORD;

        let mut buf = [0u8; WORD];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    /// A word holding a page number or slot
    fn page(&mut self) -> IndexResult<usize> {
        let value = self.word()?;
        usize::try_from(value)
            .map_err(|_| IndexError::corrupted(self.page_id, format!("negative page number {}", value)))
    }

    /// An entry count that must fit in the page
    fn count(&mut self, header_words: usize, entry_words: usize) -> IndexResult<usize> {
        let count = self.page()?;
        let max = (PAGE_SIZE / WORD - header_words) / entry_words;
        if count > max {
            return Err(IndexError::corrupted(
                self.page_id,
                format!("{} entries, at most {} fit", count, max),
            ));
        }
        Ok(count)
    }
}
