//! The multiplexer/demultiplexer proper: outbound prefix construction and
//! inbound prefix validation + routing.
//!
//! Grounded on `mlpx.c`'s `mux()`/`demux()`/`mlpx_printf()`.

use crate::channel::ChannelMap;
use crate::message::{Message, ERR};
use crate::util::{is_hex_upper, parse_hex_byte, CHN_CMD, CHN_MSG};

/// Where a successfully demultiplexed message should go next.
pub enum DemuxTarget {
    /// Route to the command interpreter's input queue.
    Cmd,
    /// Echo straight back out via `mux()` onto `CHN_MSG`.
    EchoMsg,
    /// Enqueue on this channel's write queue.
    Channel(u8),
}

/// Build a one-off diagnostic/formatted message addressed to `id`
/// (normally `CHN_MSG` or `CHN_CMD`), already muxed and ready to enqueue
/// on the shared output. Mirrors `mlpx_printf()`.
pub fn printf(id: u8, flags: u8, text: impl Into<String>) -> Message {
    let mut m = Message::plain(text.into().into_bytes(), flags);
    m.mux(id);
    m
}

/// Validate and route one inbound line from the shared input stream.
///
/// On success, returns the routing target and the message with its prefix
/// stripped (flagged `PLAIN`), ready to be handed to the target queue.
/// On failure, returns a ready-to-enqueue diagnostic message for
/// `CHN_MSG` and the original message is discarded, matching `demux()`'s
/// "emit a `!FF!` notice, drop the line" behavior.
pub fn demux(mut msg: Message, channels: &ChannelMap) -> Result<(DemuxTarget, Message), Message> {
    debug_assert!(!msg.is_plain(), "demux(): message already plain");

    if msg.len() < 6 {
        return Err(printf(
            CHN_MSG,
            ERR,
            "demux(): illegal input (too short to have valid prefix)\n",
        ));
    }

    let prefix = msg.prefix().expect("checked not plain above");
    if prefix[0] != b'<' || prefix[3] != b'<' || prefix[4] != b' ' {
        return Err(printf(
            CHN_MSG,
            ERR,
            "demux(): illegal prefix (wrong framing chars)\n",
        ));
    }
    if !is_hex_upper(prefix[1]) || !is_hex_upper(prefix[2]) {
        return Err(printf(
            CHN_MSG,
            ERR,
            "demux(): illegal prefix (garbled channel id)\n",
        ));
    }
    let id = parse_hex_byte(prefix[1], prefix[2]).expect("validated hex digits above");

    let Some(ch) = channels.get(id) else {
        return Err(printf(
            CHN_MSG,
            ERR,
            format!("demux(): channel {id:02X} does not exist\n"),
        ));
    };
    if ch.is_in_progress() {
        return Err(printf(
            CHN_MSG,
            ERR,
            format!("demux(): channel {id:02X} not yet ready\n"),
        ));
    }
    if ch.flags & crate::channel::WR == 0 {
        return Err(printf(
            CHN_MSG,
            ERR,
            format!("demux(): channel {id:02X} not open for writing\n"),
        ));
    }

    msg.strip_prefix_as_demuxed();

    let target = if id == CHN_CMD {
        DemuxTarget::Cmd
    } else if id == CHN_MSG {
        DemuxTarget::EchoMsg
    } else {
        DemuxTarget::Channel(id)
    };

    Ok((target, msg))
}
