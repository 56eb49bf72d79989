//! Message dispatch through the active handler stack.
//!
//! A message makes two passes. `process` runs innermost to outermost and
//! stops after a handler sets `stop`; then the default action resolves the
//! value; then `postprocess` runs over the same handlers outermost to
//! innermost. Only handlers visited on the way in see the message on the way
//! out. Site names are checked before the message is processed and again
//! once its value is resolved.

use std::rc::Rc;

use crate::context::{emit_warning, handler_snapshot, with_context, with_param_store, ContextRng, SiteRecord};
use crate::dispatch_trace;
use crate::error::{PoutineError, PoutineWarning, Result};
use crate::handler::Messenger;
use crate::message::{Message, MessageType, Primitive};

/// Send `msg` through every active handler and resolve its value.
pub fn apply_stack(msg: &mut Message) -> Result<()> {
    reject_known_conflict(msg)?;

    let handlers = handler_snapshot();

    let mut visited = 0;
    for handler in handlers.iter().rev() {
        visited += 1;
        dispatch_trace!("process '{}' at {}", msg.name, handler.borrow().kind());
        handler.borrow_mut().process(msg)?;
        if msg.stop {
            dispatch_trace!("'{}' stopped after {} handler(s)", msg.name, visited);
            break;
        }
    }

    default_process_message(msg)?;

    // Before postprocess, so no handler records a site that is then rejected.
    register_site(msg)?;

    for handler in &handlers[handlers.len() - visited..] {
        dispatch_trace!("postprocess '{}' at {}", msg.name, handler.borrow().kind());
        handler.borrow_mut().postprocess(msg)?;
    }

    if let Some(continuation) = msg.continuation.clone() {
        continuation(msg)?;
    }
    Ok(())
}

/// Resolve the value unless a handler already did.
pub(crate) fn default_process_message(msg: &mut Message) -> Result<()> {
    if msg.done || msg.is_observed || msg.value.is_some() {
        msg.done = true;
        return Ok(());
    }
    let value = match &msg.primitive {
        Primitive::Sample { dist, args } => {
            // Clone the handle so a distribution that itself dispatches can
            // run without anything borrowed.
            let dist = Rc::clone(dist);
            dist.sample(args, &mut ContextRng)?
        }
        Primitive::Param { init, tags } => {
            with_param_store(|store| store.get_param(&msg.name, init.clone(), tags))?
        }
    };
    msg.value = Some(value);
    msg.done = true;
    Ok(())
}

enum SiteCheck {
    Fresh,
    Repeat,
    Duplicate(PoutineWarning),
    Conflict(PoutineError),
}

/// Conflicts no handler can resolve, detectable before the message is
/// processed. A sample never turns into a param, and a latent sample name
/// can never be reused.
fn known_conflict(previous: &SiteRecord, msg: &Message) -> Option<PoutineError> {
    if !msg.is_sample() {
        // `lift` may still turn it into a sample.
        return None;
    }
    match previous.site_type {
        MessageType::Param => Some(PoutineError::naming_conflict(
            &msg.name,
            "name is used by both a param site and a sample site",
        )),
        MessageType::Sample if !previous.is_observed => Some(PoutineError::naming_conflict(
            &msg.name,
            "sample site name is used more than once",
        )),
        MessageType::Sample => None,
    }
}

fn check_repeat(previous: &SiteRecord, msg: &Message) -> SiteCheck {
    let site_type = msg.message_type();
    if previous.site_type != site_type {
        return SiteCheck::Conflict(PoutineError::naming_conflict(
            &msg.name,
            format!(
                "name is used by both a {} site and a {} site",
                previous.site_type, site_type
            ),
        ));
    }
    if site_type == MessageType::Param {
        return SiteCheck::Repeat;
    }
    if previous.is_observed != msg.is_observed {
        return SiteCheck::Conflict(PoutineError::naming_conflict(
            &msg.name,
            "site is observed in one occurrence and latent in another",
        ));
    }
    if msg.is_observed && previous.value == msg.value {
        return SiteCheck::Duplicate(PoutineWarning::DuplicateObservation {
            name: msg.name.clone(),
        });
    }
    let reason = if msg.is_observed {
        "site is observed twice with different values"
    } else {
        "sample site name is used more than once"
    };
    SiteCheck::Conflict(PoutineError::naming_conflict(&msg.name, reason))
}

fn reject_known_conflict(msg: &Message) -> Result<()> {
    let conflict = with_context(|ctx| {
        if !ctx.config.validate_site_names {
            return None;
        }
        ctx.sites
            .get(&msg.name)
            .and_then(|previous| known_conflict(previous, msg))
    });
    match conflict {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Names are unique within one outermost execution; a param may be read
/// again under the same name.
fn register_site(msg: &Message) -> Result<()> {
    let check = with_context(|ctx| {
        if !ctx.config.validate_site_names {
            return SiteCheck::Fresh;
        }
        match ctx.sites.get(&msg.name) {
            Some(previous) => check_repeat(previous, msg),
            None => {
                ctx.sites.insert(
                    msg.name.clone(),
                    SiteRecord {
                        site_type: msg.message_type(),
                        is_observed: msg.is_observed,
                        value: msg.value.clone(),
                    },
                );
                SiteCheck::Fresh
            }
        }
    });
    match check {
        SiteCheck::Fresh | SiteCheck::Repeat => Ok(()),
        SiteCheck::Duplicate(warning) => {
            emit_warning(warning);
            Ok(())
        }
        SiteCheck::Conflict(err) => Err(err),
    }
}
