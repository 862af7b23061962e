//! Maps decoded requests to handlers that mutate the tree and/or watch
//! registry and produce a reply.

use crate::proto::{Opcode, XsdError};
use crate::worker::{self, DomainContext};
use crate::XenstoreEngine;
use xsd_ring::Message;
use xsd_store::Tree;

/// Dispatches one decoded request, returning the reply to write back, or
/// `None` for a request whose reply is deliberately deferred
/// (`TRANSACTION_END`, emitted on the worker's next loop iteration).
pub fn dispatch(message: &Message, ctx: &DomainContext, engine: &XenstoreEngine) -> Result<Option<Message>, XsdError> {
    let opcode = Opcode::try_from(message.header.ty).map_err(|()| XsdError::Enosys)?;
    let req_id = message.header.req_id;
    let tx_id = message.header.tx_id;
    let reply_ty = message.header.ty;
    let payload = &message.payload;

    let reply = |bytes: Vec<u8>| Some(Message::new(reply_ty, req_id, tx_id, bytes));

    match opcode {
        Opcode::Control => Ok(reply(b"OK\0".to_vec())),

        Opcode::Directory => {
            let (path_bytes, _) = split_path_value(payload)?;
            let abs_path = construct_path(path_bytes, ctx)?;
            match engine.tree().lookup(&abs_path) {
                Some(snap) => {
                    let mut out = Vec::new();
                    for name in snap.children {
                        out.extend_from_slice(name.as_bytes());
                        out.push(0);
                    }
                    Ok(reply(out))
                }
                None => Ok(reply(Vec::new())),
            }
        }

        Opcode::Read => {
            let (path_bytes, _) = split_path_value(payload)?;
            let abs_path = construct_path(path_bytes, ctx)?;
            match engine.tree().lookup(&abs_path) {
                Some(snap) => Ok(reply(snap.value.unwrap_or_default())),
                None => Err(XsdError::Enoent),
            }
        }

        Opcode::GetPerms => Err(XsdError::Enosys),
        Opcode::SetPerms => Ok(reply(b"OK\0".to_vec())),

        Opcode::Watch => {
            let (path_bytes, token) = split_path_value(payload)?;
            let raw_path = std::str::from_utf8(path_bytes).map_err(|_| XsdError::Einval)?;
            let relative = !raw_path.starts_with('/');
            let abs_path = Tree::construct_path(raw_path, ctx.domid()).map_err(XsdError::from)?;

            let already_exists = engine.tree().exists(&abs_path);
            engine.watches().register(abs_path.clone(), token.to_vec(), ctx.domid(), relative);
            if already_exists {
                engine.watches().enqueue_for(abs_path, ctx.domid(), engine.pool());
            }
            Ok(reply(b"OK\0".to_vec()))
        }

        Opcode::Unwatch => {
            let (path_bytes, token) = split_path_value(payload)?;
            let abs_path = construct_path(path_bytes, ctx)?;
            engine.watches().unregister(&abs_path, token, ctx.domid());
            Ok(reply(Vec::new()))
        }

        Opcode::TransactionStart => {
            let id = worker::start_transaction(ctx)?;
            Ok(reply(id.to_string().into_bytes()))
        }

        Opcode::TransactionEnd => {
            worker::set_pending_txn_end(ctx, req_id);
            Ok(None)
        }

        Opcode::GetDomainPath => {
            let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
            let domstr = std::str::from_utf8(&payload[..end]).map_err(|_| XsdError::Einval)?;
            Ok(reply(format!("/local/domain/{domstr}").into_bytes()))
        }

        Opcode::Write => {
            let (path_bytes, value) = split_path_value(payload)?;
            let abs_path = construct_path(path_bytes, ctx)?;
            engine.tree().write(&abs_path, value).map_err(XsdError::from)?;
            engine.watches().fire(&abs_path, ctx.domid(), engine.pool());
            Ok(reply(b"OK\0".to_vec()))
        }

        Opcode::Mkdir => {
            let (path_bytes, _) = split_path_value(payload)?;
            let abs_path = construct_path(path_bytes, ctx)?;
            engine.tree().write(&abs_path, &[]).map_err(XsdError::from)?;
            engine.watches().fire(&abs_path, ctx.domid(), engine.pool());
            Ok(reply(b"OK\0".to_vec()))
        }

        Opcode::Rm => {
            let (path_bytes, _) = split_path_value(payload)?;
            let abs_path = construct_path(path_bytes, ctx)?;
            if engine.tree().remove(&abs_path) {
                engine.watches().fire(&abs_path, ctx.domid(), engine.pool());
                Ok(reply(Vec::new()))
            } else {
                Err(XsdError::Enoent)
            }
        }

        Opcode::ResetWatches => {
            engine.watches().reset_all();
            Ok(reply(b"OK\0".to_vec()))
        }

        Opcode::Introduce
        | Opcode::Release
        | Opcode::WatchEvent
        | Opcode::Error
        | Opcode::IsDomainIntroduced
        | Opcode::Resume
        | Opcode::SetTarget
        | Opcode::DirectoryPart => Err(XsdError::Enosys),
    }
}

/// Splits `payload` at its first null byte into `(path, rest)`. A missing
/// terminator means the caller can't determine where the path ends, which
/// is the concrete form this system's `payload_len < path_len` check takes.
fn split_path_value(payload: &[u8]) -> Result<(&[u8], &[u8]), XsdError> {
    let pos = payload.iter().position(|&b| b == 0).ok_or(XsdError::Einval)?;
    Ok((&payload[..pos], &payload[pos + 1..]))
}

fn construct_path(path_bytes: &[u8], ctx: &DomainContext) -> Result<String, XsdError> {
    let path_str = std::str::from_utf8(path_bytes).map_err(|_| XsdError::Einval)?;
    Tree::construct_path(path_str, ctx.domid()).map_err(XsdError::from)
}
