// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use plantdesk_api::Client;
use plantdesk_app::{PendingWrite, Record};
use plantdesk_tui::InternalEvent;
use std::sync::mpsc::Sender;
use std::thread;

/// Backs the TUI with the HTTP client. Loads and writes run on their own
/// threads so a slow endpoint never stalls the event loop.
pub struct ApiRuntime {
    client: Client,
    id_field: String,
}

impl ApiRuntime {
    pub fn new(client: Client, id_field: &str) -> Self {
        Self {
            client,
            id_field: id_field.to_owned(),
        }
    }
}

impl plantdesk_tui::AppRuntime for ApiRuntime {
    fn load_records(&mut self) -> Result<Vec<Record>> {
        self.client.fetch_records(&self.id_field)
    }

    fn submit_update(&mut self, write: &PendingWrite) -> Result<()> {
        self.client.submit_update(write)
    }

    fn spawn_load(&mut self, tx: Sender<InternalEvent>) -> Result<()> {
        let client = self.client.clone();
        let id_field = self.id_field.clone();
        thread::Builder::new()
            .name("plantdesk-load".to_owned())
            .spawn(move || {
                let result = client
                    .fetch_records(&id_field)
                    .map_err(|error| format!("{error:#}"));
                let _ = tx.send(InternalEvent::LoadFinished(result));
            })
            .context("spawn load worker")?;
        Ok(())
    }

    fn spawn_update(&mut self, write: PendingWrite, tx: Sender<InternalEvent>) -> Result<()> {
        let client = self.client.clone();
        thread::Builder::new()
            .name(format!("plantdesk-write-{}", write.id))
            .spawn(move || {
                let result = client
                    .submit_update(&write)
                    .map_err(|error| format!("{error:#}"));
                match &result {
                    Ok(()) => tracing::info!(id = %write.id, "write acknowledged"),
                    Err(error) => tracing::warn!(id = %write.id, %error, "write rejected"),
                }
                let _ = tx.send(InternalEvent::WriteFinished {
                    id: write.id,
                    result,
                });
            })
            .context("spawn write worker")?;
        Ok(())
    }
}
