use crate::MAX_FRAMES;

/// The return addresses of the active frames of a thread, innermost first.
///
/// Stored inline so that capturing never touches the heap.
#[derive(Clone, PartialEq, Eq)]
pub struct Frames {
    addrs: [usize; MAX_FRAMES],
    len: usize,
}

impl Frames {
    #[inline]
    pub const fn empty() -> Self {
        Self {
            addrs: [0; MAX_FRAMES],
            len: 0,
        }
    }

    /// Builds a sequence from already known addresses, eg. a synthetic stack.
    /// Anything past [`MAX_FRAMES`] is dropped.
    pub fn from_slice(addrs: &[usize]) -> Self {
        let mut frames = Self::empty();
        let len = addrs.len().min(MAX_FRAMES);
        frames.addrs[..len].copy_from_slice(&addrs[..len]);
        frames.len = len;
        frames
    }

    /// Walks the stack of the calling thread, recording at most `max_depth`
    /// instruction pointers.
    ///
    /// Only the instruction pointers are recorded, symbol resolution is done
    /// separately, as it is considerably more likely to crash in a compromised
    /// context.
    ///
    /// The first entry is this function's own call site.
    #[inline(never)]
    pub fn capture(max_depth: usize) -> Self {
        let max_depth = max_depth.min(MAX_FRAMES);
        let mut frames = Self::empty();

        if max_depth == 0 {
            return frames;
        }

        // SAFETY: we never resolve symbols during the walk, and only a single
        // thread can be handling a fault at a time
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                frames.addrs[frames.len] = frame.ip() as usize;
                frames.len += 1;
                frames.len < max_depth
            });
        }

        frames
    }

    /// Replaces the innermost frame with the address of the instruction that
    /// faulted.
    ///
    /// The innermost frame from [`Self::capture`] is the handler itself, which
    /// is useless in a report, whereas the faulting instruction may not be on
    /// the stack at all, eg. if it was in a leaf function.
    #[inline]
    pub fn substitute_instruction_pointer(&mut self, ip: Option<usize>) {
        if let (Some(ip), true) = (ip, self.len > 0) {
            self.addrs[0] = ip;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.addrs[..self.len]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.as_slice().iter().copied()
    }
}

impl std::fmt::Debug for Frames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|addr| format!("{addr:#x}")))
            .finish()
    }
}
