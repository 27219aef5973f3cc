/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Shared DNS-level helpers used by the pool and its endpoints.

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::{Name, RecordType};

/// Response code stamped on synthesized no-response messages.
///
/// 50 lies in the unassigned range so it can never collide with a real answer.
pub const RCODE_NO_RESPONSE: u16 = 50;

/// Strip the trailing root label from a presentation-format name.
pub fn remove_last_dot(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Canonical form of a query name used for exchange matching.
pub fn normalize_name(name: &Name) -> String {
    remove_last_dot(&name.to_ascii()).to_ascii_lowercase()
}

/// Extract `(id, normalized name, type)` from the first question of a message.
pub fn first_question(message: &Message) -> Option<(u16, String, RecordType)> {
    message
        .queries()
        .first()
        .map(|query| (message.id(), normalize_name(query.name()), query.query_type()))
}

/// Turn a query into the distinguished no-response outcome.
pub fn mark_no_response(message: &mut Message) {
    message.set_response_code(RCODE_NO_RESPONSE.into());
}

/// Whether a delivered message carries the no-response code.
pub fn is_no_response(message: &Message) -> bool {
    u16::from(message.response_code()) == RCODE_NO_RESPONSE
}

/// Build a minimal DNS response from request, preserving id/opcode/query.
pub fn build_response_from_request(request: &Message, rcode: ResponseCode) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_op_code(request.op_code());
    response.set_message_type(MessageType::Response);
    response.set_response_code(rcode);
    response.add_queries(request.queries().to_vec());
    response
}
