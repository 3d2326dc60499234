//! The global lock ordering.
//!
//! Every mutex belongs to a [`LockLevel`]. Levels are acquired in strictly
//! decreasing order: a thread holding a mutex at level `L` may only acquire
//! mutexes whose level is below `L`.
//!
//! ```text
//! mutator (high, acquired first) → ... → default → ... → abort → logging (low, acquired last)
//! ```

use std::fmt;

/// Placement of a mutex category in the global acquisition order.
///
/// Lower values are innermost: a logging lock can be taken while holding
/// anything else, the mutator lock only while holding nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LockLevel {
    /// Log sinks.
    Logging = 0,
    /// The memory-map registry.
    MemMaps,
    /// Fatal signal reporting.
    UnexpectedSignal,
    /// Per-thread suspend counts.
    ThreadSuspendCount,
    /// Abort serialization. Last level of the low-severity range.
    Abort,
    /// Debugger transport socket.
    DebuggerSocket,
    /// Region-space regions.
    RegionSpaceRegion,
    /// Allocator global state.
    AllocatorGlobal,
    /// Allocator size brackets.
    AllocatorBracket,
    /// Collector mark stack.
    MarkStack,
    /// Transaction logs.
    TransactionLog,
    /// Weak global native references.
    JniWeakGlobals,
    /// Reference queues.
    ReferenceQueue,
    /// Reference processor.
    ReferenceProcessor,
    /// Compiled code cache.
    JitCodeCache,
    /// Catch-all level for mutexes without a dedicated category.
    Default,
    /// Large-object space.
    LargeObject,
    /// Pinned-object table.
    PinTable,
    /// Thread id allocation.
    AllocatedThreadIds,
    /// Monitor pool.
    MonitorPool,
    /// Method verifiers.
    MethodVerifiers,
    /// Loaded classes table.
    ClassLinkerClasses,
    /// Debugger breakpoints.
    Breakpoint,
    /// Application-visible monitors. Never recorded in the held-mutex table.
    Monitor,
    /// Monitor list.
    MonitorList,
    /// Native library loading.
    JniLoadLibrary,
    /// The thread list.
    ThreadList,
    /// Allocation tracker.
    AllocTracker,
    /// Deoptimization requests.
    Deoptimization,
    /// Sampling profiler.
    Profiler,
    /// Debugger event list.
    DebuggerEventList,
    /// Debugger attach.
    DebuggerAttach,
    /// Runtime shutdown.
    RuntimeShutdown,
    /// Method tracing.
    Trace,
    /// Heap bitmaps.
    HeapBitmap,
    /// Heap state.
    Heap,
    /// The mutator lock.
    Mutator,
    /// Instrumentation entry points.
    InstrumentEntrypoints,
    /// Zygote space creation.
    ZygoteCreation,
}

impl LockLevel {
    /// Number of levels; the size of every per-thread held-mutex table.
    pub const COUNT: usize = Self::ZygoteCreation as usize + 1;

    /// All levels in ascending order.
    pub const ALL: [LockLevel; Self::COUNT] = [
        Self::Logging,
        Self::MemMaps,
        Self::UnexpectedSignal,
        Self::ThreadSuspendCount,
        Self::Abort,
        Self::DebuggerSocket,
        Self::RegionSpaceRegion,
        Self::AllocatorGlobal,
        Self::AllocatorBracket,
        Self::MarkStack,
        Self::TransactionLog,
        Self::JniWeakGlobals,
        Self::ReferenceQueue,
        Self::ReferenceProcessor,
        Self::JitCodeCache,
        Self::Default,
        Self::LargeObject,
        Self::PinTable,
        Self::AllocatedThreadIds,
        Self::MonitorPool,
        Self::MethodVerifiers,
        Self::ClassLinkerClasses,
        Self::Breakpoint,
        Self::Monitor,
        Self::MonitorList,
        Self::JniLoadLibrary,
        Self::ThreadList,
        Self::AllocTracker,
        Self::Deoptimization,
        Self::Profiler,
        Self::DebuggerEventList,
        Self::DebuggerAttach,
        Self::RuntimeShutdown,
        Self::Trace,
        Self::HeapBitmap,
        Self::Heap,
        Self::Mutator,
        Self::InstrumentEntrypoints,
        Self::ZygoteCreation,
    ];

    /// Index of this level in a held-mutex table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the level stored at `index`, if any.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Violations involving a held mutex at or below this range are only
    /// warnings, so that logging and abort paths can still run while
    /// holding low-level locks.
    #[inline]
    #[must_use]
    pub fn is_low_severity(self) -> bool {
        self <= Self::Abort
    }

    /// Levels that may be locked from a context without a [`Thread`](crate::Thread).
    #[must_use]
    pub fn permitted_without_thread(self) -> bool {
        matches!(
            self,
            Self::Logging
                | Self::Abort
                | Self::AllocatedThreadIds
                | Self::ThreadList
                | Self::RuntimeShutdown
        )
    }

    /// Snake-case category name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Logging => "logging",
            Self::MemMaps => "mem_maps",
            Self::UnexpectedSignal => "unexpected_signal",
            Self::ThreadSuspendCount => "thread_suspend_count",
            Self::Abort => "abort",
            Self::DebuggerSocket => "debugger_socket",
            Self::RegionSpaceRegion => "region_space_region",
            Self::AllocatorGlobal => "allocator_global",
            Self::AllocatorBracket => "allocator_bracket",
            Self::MarkStack => "mark_stack",
            Self::TransactionLog => "transaction_log",
            Self::JniWeakGlobals => "jni_weak_globals",
            Self::ReferenceQueue => "reference_queue",
            Self::ReferenceProcessor => "reference_processor",
            Self::JitCodeCache => "jit_code_cache",
            Self::Default => "default",
            Self::LargeObject => "large_object",
            Self::PinTable => "pin_table",
            Self::AllocatedThreadIds => "allocated_thread_ids",
            Self::MonitorPool => "monitor_pool",
            Self::MethodVerifiers => "method_verifiers",
            Self::ClassLinkerClasses => "class_linker_classes",
            Self::Breakpoint => "breakpoint",
            Self::Monitor => "monitor",
            Self::MonitorList => "monitor_list",
            Self::JniLoadLibrary => "jni_load_library",
            Self::ThreadList => "thread_list",
            Self::AllocTracker => "alloc_tracker",
            Self::Deoptimization => "deoptimization",
            Self::Profiler => "profiler",
            Self::DebuggerEventList => "debugger_event_list",
            Self::DebuggerAttach => "debugger_attach",
            Self::RuntimeShutdown => "runtime_shutdown",
            Self::Trace => "trace",
            Self::HeapBitmap => "heap_bitmap",
            Self::Heap => "heap",
            Self::Mutator => "mutator",
            Self::InstrumentEntrypoints => "instrument_entrypoints",
            Self::ZygoteCreation => "zygote_creation",
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
