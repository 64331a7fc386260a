//! Bounded exclusion sets
//!
//! Blacklists live inside a single map value, so their capacity is fixed at
//! compile time and every membership test is bounded by that capacity.
//! Slots past `len` are never read; `len` is clamped to the capacity because
//! the record is written by userspace and read by the kernel as plain bytes.

use core::fmt;

/// Kernel thread name buffer size, including the trailing NUL.
pub const TASK_COMM_LEN: usize = 16;

/// Maximum number of blacklisted process ids.
pub const MAX_BLACKLIST_PIDS: usize = 16;

/// Maximum number of blacklisted thread ids.
pub const MAX_BLACKLIST_TIDS: usize = 16;

/// Maximum number of blacklisted thread name patterns.
pub const MAX_BLACKLIST_COMMS: usize = 8;

/// Returned when inserting into a full exclusion set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    pub capacity: usize,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exclusion set is full (capacity {})", self.capacity)
    }
}

/// Fixed-capacity set of pids or tids.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSet<const N: usize> {
    len: u32,
    ids: [u32; N],
}

impl<const N: usize> IdSet<N> {
    pub const CAPACITY: usize = N;

    pub const fn new() -> Self {
        Self {
            len: 0,
            ids: [0; N],
        }
    }

    pub fn len(&self) -> usize {
        (self.len as usize).min(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership test. An empty set never matches.
    #[inline(always)]
    pub fn contains(&self, id: u32) -> bool {
        let len = self.len();
        self.ids.iter().take(len).any(|&candidate| candidate == id)
    }

    /// Insert an id. Returns `Ok(false)` if it was already present.
    pub fn insert(&mut self, id: u32) -> Result<bool, CapacityError> {
        if self.contains(id) {
            return Ok(false);
        }
        let len = self.len();
        if len >= N {
            return Err(CapacityError { capacity: N });
        }
        self.ids[len] = id;
        self.len = (len + 1) as u32;
        Ok(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().take(self.len()).copied()
    }
}

impl<const N: usize> Default for IdSet<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// How thread name patterns are compared against the kernel-reported name.
///
/// Comparisons are case-sensitive and byte-wise. The kernel truncates
/// thread names to 15 bytes, so a pattern can only ever match those bytes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "user",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum CommMatch {
    /// The whole (truncated) thread name equals the pattern
    #[default]
    Exact = 0,
    /// The thread name starts with the pattern
    Prefix = 1,
    /// The pattern appears anywhere in the thread name
    Contains = 2,
}

impl CommMatch {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CommMatch::Exact),
            1 => Some(CommMatch::Prefix),
            2 => Some(CommMatch::Contains),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Reasons a thread name pattern is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    Empty,
    TooLong { len: usize },
    InteriorNul,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::Empty => f.write_str("thread name pattern is empty"),
            PatternError::TooLong { len } => write!(
                f,
                "thread name pattern is {} bytes, kernel thread names hold at most {}",
                len,
                CommPattern::MAX_LEN
            ),
            PatternError::InteriorNul => f.write_str("thread name pattern contains a NUL byte"),
        }
    }
}

/// A thread name pattern of at most 15 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommPattern {
    len: u32,
    bytes: [u8; TASK_COMM_LEN],
}

impl CommPattern {
    pub const MAX_LEN: usize = TASK_COMM_LEN - 1;

    const EMPTY: Self = Self {
        len: 0,
        bytes: [0; TASK_COMM_LEN],
    };

    pub fn new(name: &[u8]) -> Result<Self, PatternError> {
        if name.is_empty() {
            return Err(PatternError::Empty);
        }
        if name.len() > Self::MAX_LEN {
            return Err(PatternError::TooLong { len: name.len() });
        }
        if name.contains(&0) {
            return Err(PatternError::InteriorNul);
        }
        let mut bytes = [0u8; TASK_COMM_LEN];
        bytes[..name.len()].copy_from_slice(name);
        Ok(Self {
            len: name.len() as u32,
            bytes,
        })
    }

    pub fn len(&self) -> usize {
        (self.len as usize).min(Self::MAX_LEN)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    #[inline(always)]
    pub fn matches(&self, comm: &[u8; TASK_COMM_LEN], mode: CommMatch) -> bool {
        let plen = self.len();
        let clen = comm_len(comm);
        // A zeroed pattern slot or an unknown thread name matches nothing.
        if plen == 0 || plen > clen {
            return false;
        }
        match mode {
            CommMatch::Exact => plen == clen && eq_at(comm, 0, &self.bytes, plen),
            CommMatch::Prefix => eq_at(comm, 0, &self.bytes, plen),
            CommMatch::Contains => {
                (0..TASK_COMM_LEN)
                    .take(clen - plen + 1)
                    .any(|start| eq_at(comm, start, &self.bytes, plen))
            }
        }
    }
}

/// Length of a NUL-padded thread name.
#[inline(always)]
pub fn comm_len(comm: &[u8; TASK_COMM_LEN]) -> usize {
    comm.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN)
}

// Byte loop instead of slice equality: the BPF backend has no memcmp.
#[inline(always)]
fn eq_at(
    haystack: &[u8; TASK_COMM_LEN],
    start: usize,
    needle: &[u8; TASK_COMM_LEN],
    len: usize,
) -> bool {
    for i in 0..TASK_COMM_LEN {
        if i >= len {
            break;
        }
        match haystack.get(start + i) {
            Some(&b) if b == needle[i] => {}
            _ => return false,
        }
    }
    true
}

/// Fixed-capacity set of thread name patterns sharing one match mode.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommSet<const N: usize> {
    mode: u32,
    len: u32,
    patterns: [CommPattern; N],
}

impl<const N: usize> CommSet<N> {
    pub const CAPACITY: usize = N;

    pub const fn new(mode: CommMatch) -> Self {
        Self {
            mode: mode.as_raw(),
            len: 0,
            patterns: [CommPattern::EMPTY; N],
        }
    }

    /// `None` when the stored mode is not a known value.
    pub fn mode(&self) -> Option<CommMatch> {
        CommMatch::from_raw(self.mode)
    }

    pub fn set_mode(&mut self, mode: CommMatch) {
        self.mode = mode.as_raw();
    }

    pub fn len(&self) -> usize {
        (self.len as usize).min(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, pattern: CommPattern) -> Result<bool, CapacityError> {
        if self.iter().any(|existing| *existing == pattern) {
            return Ok(false);
        }
        let len = self.len();
        if len >= N {
            return Err(CapacityError { capacity: N });
        }
        self.patterns[len] = pattern;
        self.len = (len + 1) as u32;
        Ok(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommPattern> + '_ {
        self.patterns.iter().take(self.len())
    }

    /// True if any pattern matches `comm`. An empty set never matches; a
    /// non-empty set with an unknown match mode always does.
    #[inline(always)]
    pub fn matches(&self, comm: &[u8; TASK_COMM_LEN]) -> bool {
        if self.is_empty() {
            return false;
        }
        let Some(mode) = self.mode() else {
            return true;
        };
        self.iter().any(|pattern| pattern.matches(comm, mode))
    }
}

impl<const N: usize> Default for CommSet<N> {
    fn default() -> Self {
        Self::new(CommMatch::default())
    }
}
