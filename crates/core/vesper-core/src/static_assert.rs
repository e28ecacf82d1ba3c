//! Compile-time assertions for struct layout and size invariants.

/// Asserts a const-evaluable boolean expression at compile time.
///
/// Used to pin down layout assumptions (e.g. a per-CPU struct's size) that
/// would otherwise only surface as a mysterious runtime corruption.
#[macro_export]
macro_rules! static_assert {
    ($cond:expr $(,)?) => {
        const _: () = assert!($cond);
    };
    ($cond:expr, $msg:expr $(,)?) => {
        const _: () = assert!($cond, $msg);
    };
}

#[cfg(test)]
mod tests {
    static_assert!(core::mem::size_of::<u64>() == 8);
}
