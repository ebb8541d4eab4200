//! Client-side app-state sync: the fetch loop and the mutation router.

use crate::appstate::errors::AppStateError;
use crate::appstate::processor::{Mutation, Processor};
use crate::appstate::sync;
use crate::binary::NodeContent;
use crate::client::Client;
use crate::proto::SyncdOperation;
use crate::request::InfoQuery;
use crate::types::events;
use crate::types::events::Event;
use crate::types::jid::Jid;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, info};
use std::str::FromStr;
use std::sync::Arc;

impl Client {
    /// Fetches updates for one app-state collection. With `full_sync` the
    /// persisted state is dropped first and every patch is re-fetched.
    ///
    /// Sync work is serialized under one client-wide lock, so at most one
    /// collection syncs at a time.
    pub async fn fetch_app_state(
        &self,
        name: &str,
        full_sync: bool,
        only_if_not_synced: bool,
    ) -> Result<(), AppStateError> {
        let _sync_guard = self.app_state_sync_lock.lock().await;

        let mut full_sync = full_sync;
        if full_sync {
            self.store.app_state.delete_app_state_version(name).await?;
        }
        let mut state = self.store.app_state.get_app_state_version(name).await?;
        if state.version == 0 {
            full_sync = true;
        } else if only_if_not_synced {
            return Ok(());
        }

        info!(target: "Client/AppState",
            "Syncing '{name}' from version {} (full_sync: {full_sync})", state.version);

        let processor = Processor::new(
            self.store.app_state_keys.clone(),
            self.store.app_state.clone(),
        );
        let dispatch_events = !full_sync || self.config.emit_app_state_events_on_full_sync;

        let mut has_more = true;
        while has_more {
            let query = sync::build_fetch_patches_query(name, state.version);
            let resp = self
                .send_iq(InfoQuery::set(
                    "w:sync:app:state",
                    Jid::server_jid(),
                    Some(NodeContent::Nodes(vec![query])),
                ))
                .await?;

            let list =
                sync::parse_patch_list(name, &resp, self.config.blob_downloader.as_deref())
                    .await?;
            has_more = list.has_more_patches;

            let (mutations, new_state) = match processor.decode_patches(&list, state).await {
                Ok(decoded) => decoded,
                Err(AppStateError::KeysNotFound(key_ids)) => {
                    info!(target: "Client/AppState",
                        "Missing {} sync keys for '{name}', asking host to fetch them",
                        key_ids.len());
                    self.dispatch_event(Event::AppStateKeyRequest(events::AppStateKeyRequest {
                        key_ids: key_ids.clone(),
                    }))
                    .await;
                    return Err(AppStateError::KeysNotFound(key_ids));
                }
                Err(e) => return Err(e),
            };
            state = new_state;

            debug!(target: "Client/AppState",
                "Decoded {} mutations for '{name}', now at version {}",
                mutations.len(), state.version);
            for mutation in mutations {
                if mutation.operation == SyncdOperation::Set {
                    self.dispatch_app_state(mutation, dispatch_events).await;
                }
            }
        }

        if full_sync {
            self.dispatch_event(Event::AppStateSyncComplete(events::AppStateSyncComplete {
                name: name.to_string(),
            }))
            .await;
        }
        Ok(())
    }

    /// Routes one SET mutation to its typed event and store side effect.
    /// Store writes happen before the event so handlers observe a
    /// consistent store; store errors are logged, never fatal to the sync.
    pub(crate) async fn dispatch_app_state(&self, mutation: Mutation, dispatch_events: bool) {
        let Some(kind) = mutation.index.first() else {
            return;
        };
        let kind = kind.clone();

        // Message-scoped indices are silently discarded when too short to
        // carry their target.
        if (kind == "star" || kind == "deleteMessageForMe") && mutation.index.len() < 5 {
            return;
        }

        if dispatch_events {
            self.dispatch_event(Event::AppState(events::AppState {
                index: mutation.index.clone(),
                value: mutation.action.clone(),
            }))
            .await;
        }

        let jid = mutation
            .index
            .get(1)
            .and_then(|raw| Jid::from_str(raw).ok())
            .unwrap_or_default();
        let ts = unix_ts(mutation.action.timestamp());
        let action = &mutation.action;

        let event = match kind.as_str() {
            "mute" => {
                let act = action.mute_action.clone().unwrap_or_default();
                let muted_until = if act.muted.unwrap_or(false) {
                    Some(unix_ts(act.mute_end_timestamp.unwrap_or_default()))
                } else {
                    None
                };
                if let Some(chat_settings) = &self.store.chat_settings {
                    if let Err(e) = chat_settings.put_muted_until(&jid, muted_until).await {
                        error!(target: "Client/AppState", "Failed to store mute setting: {e}");
                    }
                }
                Some(Event::Mute(events::Mute {
                    jid,
                    timestamp: ts,
                    action: act,
                }))
            }
            "pin_v1" => {
                let act = action.pin_action.clone().unwrap_or_default();
                if let Some(chat_settings) = &self.store.chat_settings {
                    if let Err(e) = chat_settings
                        .put_pinned(&jid, act.pinned.unwrap_or(false))
                        .await
                    {
                        error!(target: "Client/AppState", "Failed to store pin setting: {e}");
                    }
                }
                Some(Event::Pin(events::Pin {
                    jid,
                    timestamp: ts,
                    action: act,
                }))
            }
            "archive" => {
                let act = action.archive_chat_action.clone().unwrap_or_default();
                if let Some(chat_settings) = &self.store.chat_settings {
                    if let Err(e) = chat_settings
                        .put_archived(&jid, act.archived.unwrap_or(false))
                        .await
                    {
                        error!(target: "Client/AppState", "Failed to store archive setting: {e}");
                    }
                }
                Some(Event::Archive(events::Archive {
                    jid,
                    timestamp: ts,
                    action: act,
                }))
            }
            "contact" => {
                let act = action.contact_action.clone().unwrap_or_default();
                if let Some(contacts) = &self.store.contacts {
                    if let Err(e) = contacts
                        .put_contact_name(
                            &jid,
                            act.first_name.as_deref().unwrap_or_default(),
                            act.full_name.as_deref().unwrap_or_default(),
                        )
                        .await
                    {
                        error!(target: "Client/AppState", "Failed to store contact name: {e}");
                    }
                }
                Some(Event::Contact(events::Contact {
                    jid,
                    timestamp: ts,
                    action: act,
                }))
            }
            "star" => message_index_parts(&mutation.index, jid).map(|(chat, id, from_me, sender)| {
                Event::Star(events::Star {
                    chat_jid: chat,
                    sender_jid: sender,
                    is_from_me: from_me,
                    message_id: id,
                    timestamp: ts,
                    action: action.star_action.clone().unwrap_or_default(),
                })
            }),
            "deleteMessageForMe" => {
                message_index_parts(&mutation.index, jid).map(|(chat, id, from_me, sender)| {
                    Event::DeleteForMe(events::DeleteForMe {
                        chat_jid: chat,
                        sender_jid: sender,
                        is_from_me: from_me,
                        message_id: id,
                        timestamp: ts,
                        action: action.delete_message_for_me_action.clone().unwrap_or_default(),
                    })
                })
            }
            "setting_pushName" => {
                let act = action.push_name_setting.clone().unwrap_or_default();
                self.store
                    .set_push_name(act.name.as_deref().unwrap_or_default());
                if let Err(e) = self.store.save().await {
                    error!(target: "Client/AppState",
                        "Failed to save device store after push name update: {e}");
                }
                Some(Event::PushNameSetting(events::PushNameSetting {
                    timestamp: ts,
                    action: act,
                }))
            }
            "setting_unarchiveChats" => Some(Event::UnarchiveChatsSetting(
                events::UnarchiveChatsSetting {
                    timestamp: ts,
                    action: action.unarchive_chats_setting.clone().unwrap_or_default(),
                },
            )),
            _ => {
                debug!(target: "Client/AppState", "Unhandled mutation kind '{kind}'");
                None
            }
        };

        if dispatch_events {
            if let Some(event) = event {
                self.dispatch_event(event).await;
            }
        }
    }
}

fn unix_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Star and delete-for-me indices carry
/// `[kind, chat, message id, from-me flag, sender]`; anything shorter is
/// silently discarded.
fn message_index_parts(
    index: &[String],
    chat: Jid,
) -> Option<(Jid, String, bool, Option<Jid>)> {
    if index.len() < 5 {
        return None;
    }
    let message_id = index[2].clone();
    let is_from_me = index[3] == "1";
    let sender = if index[4] != "0" {
        Jid::from_str(&index[4]).ok()
    } else {
        None
    };
    Some((chat, message_id, is_from_me, sender))
}
