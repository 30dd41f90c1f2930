//! # mmalloc - a page-mapped first-fit allocator
//!
//! `mmalloc` is a user-space dynamic memory allocator that gets its backing
//! storage directly from the operating system, one anonymous page mapping
//! at a time, and sub-allocates it to callers through five operations:
//! [`Heap::malloc`], [`Heap::calloc`], [`Heap::realloc`],
//! [`Heap::reallocarray`] and [`Heap::free`].
//!
//! ## Why
//!
//! The standard heap interface hides page-level mapping decisions from the
//! caller. `mmalloc` exists for the cases where that control matters: large
//! regions are unmapped immediately on release rather than retained in a
//! hidden free list, at the cost of giving up any amortized-allocation
//! fast path.
//!
//! ## Crate layout
//!
//! ```text
//!   mmalloc
//!   ├── align  - the ALIGNMENT constant and the round_up! macro
//!   ├── block  - BlockHeader, the in-band record every block carries
//!   ├── page   - the PageSource capability (MmapSource, FakePageSource)
//!   └── heap   - Heap<P>: first-fit placement, splitting, coalescing
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use mmalloc::Heap;
//!
//! let mut heap = Heap::new();
//!
//! unsafe {
//!     let p = heap.malloc(64) as *mut u64;
//!     assert!(!p.is_null());
//!
//!     p.write(0x00C0FFEE);
//!     assert_eq!(p.read(), 0x00C0FFEE);
//!
//!     heap.free(p as *mut u8);
//! }
//! ```
//!
//! ## What this is not
//!
//! There is no concurrency story: [`Heap`] holds its registry as raw
//! pointers and is neither `Send` nor `Sync`. A caller who needs a
//! process-wide, thread-shared heap has to build that themselves (a mutex
//! around a `Heap`, for instance); this crate will not silently pretend to
//! be safe for that on their behalf. There is also no support for
//! caller-requested over-alignment, no defragmentation beyond immediate
//! neighbor coalescing, and no memory-mapped-file backing - see
//! `SPEC_FULL.md` for the full non-goal list.
//!
//! Invalid-pointer use, double-free and use-after-free are caller contract
//! violations this crate does not defend against, matching the allocator it
//! is modeled on.

pub mod align;
pub mod block;
pub mod heap;
pub mod page;

pub use block::{BlockHeader, HEADER_SIZE};
pub use heap::{BlockSnapshot, Heap};
pub use page::{FakePageSource, MmapSource, PageSource};
