//! Kernel command-line parsing.
//!
//! The only structured option this kernel interprets itself is
//! `virtio_mmio.<spec>`, forwarded verbatim to a collaborator that knows how
//! to parse a device spec string. Every other token is ignored, including
//! ones this kernel doesn't recognize — an unrecognized boot option should
//! never be fatal.

const VIRTIO_MMIO_PREFIX: &str = "virtio_mmio.";

/// Splits `cmdline` on spaces; any token beginning with `virtio_mmio.` has
/// that prefix stripped and the remainder passed to `sink`. Everything else
/// is silently ignored.
pub fn cmdline_parse(cmdline: &str, mut sink: impl FnMut(&str)) {
    for token in cmdline.split(' ') {
        if token.is_empty() {
            continue;
        }
        if let Some(rest) = token.strip_prefix(VIRTIO_MMIO_PREFIX) {
            sink(rest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn forwards_virtio_mmio_suffix_only() {
        let mut seen = None;
        cmdline_parse("virtio_mmio.device=4K@0xd0000000:10 quiet", |s| seen = Some(s.to_string()));
        assert_eq!(seen.as_deref(), Some("device=4K@0xd0000000:10"));
    }

    #[test]
    fn ignores_unknown_tokens_and_empty_fields() {
        let mut calls = 0;
        cmdline_parse("quiet  nosmp  ", |_| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn forwards_multiple_virtio_mmio_tokens_in_order() {
        let mut seen = alloc::vec::Vec::new();
        cmdline_parse("virtio_mmio.a=1 virtio_mmio.b=2", |s| seen.push(s.to_string()));
        assert_eq!(seen, alloc::vec!["a=1", "b=2"]);
    }
}
