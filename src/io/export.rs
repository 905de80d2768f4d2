use std::io::Write;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::{LedgerService, RequestContext};
use crate::domain::{
    JournalLine, MAX_PAGE_SIZE, TypeFilter, Uid, Wallet, WalletLookup, format_amount,
};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => bail!("Invalid export format '{}'. Valid formats: csv, json", other),
        }
    }
}

/// Full history of one wallet, newest entry first.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub wallet: Wallet,
    pub entries: Vec<JournalLine>,
}

/// Exporter for writing wallet statements
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Load the wallet of `uid` and walk every history page.
    pub async fn statement(&self, ctx: &RequestContext, uid: Uid) -> Result<Statement> {
        let wallet = self
            .service
            .find_wallet(WalletLookup::ByUid(uid))
            .await?
            .ok_or(LedgerError::WalletNotFound { uid })?;

        let mut entries: Vec<JournalLine> = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .service
                .list_transactions(ctx, uid, TypeFilter::ALL, page, MAX_PAGE_SIZE)
                .await?;
            let has_more = batch.has_more;

            // Entries committed while paging shift offsets; ids only go down.
            let floor = entries.last().map(|line| line.entry.id);
            entries.extend(
                batch
                    .items
                    .into_iter()
                    .filter(|line| floor.is_none_or(|id| line.entry.id < id)),
            );

            if !has_more {
                break;
            }
            page += 1;
        }

        Ok(Statement {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            wallet,
            entries,
        })
    }

    /// Export a wallet history to CSV format
    pub async fn export_history_csv<W: Write>(
        &self,
        ctx: &RequestContext,
        uid: Uid,
        writer: W,
    ) -> Result<usize> {
        let statement = self.statement(ctx, uid).await?;
        let wallet_id = statement.wallet.id;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "created_at",
            "type",
            "amount",
            "delta",
            "counterparty",
            "sender_wallet_id",
            "receiver_wallet_id",
        ])?;

        for line in &statement.entries {
            let entry = &line.entry;
            csv_writer.write_record([
                entry.id.to_string(),
                entry.created_at.to_rfc3339(),
                entry.entry_type.to_string(),
                format_amount(entry.amount.value()),
                format_amount(entry.delta_for(wallet_id)),
                line.counterparty(wallet_id).unwrap_or("external").to_string(),
                entry.sender_wallet_id.to_string(),
                entry.receiver_wallet_id.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(statement.entries.len())
    }

    /// Export a wallet statement as pretty JSON
    pub async fn export_statement_json<W: Write>(
        &self,
        ctx: &RequestContext,
        uid: Uid,
        mut writer: W,
    ) -> Result<Statement> {
        let statement = self.statement(ctx, uid).await?;

        let json = serde_json::to_string_pretty(&statement)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(statement)
    }

    pub async fn export<W: Write>(
        &self,
        ctx: &RequestContext,
        uid: Uid,
        format: ExportFormat,
        writer: W,
    ) -> Result<usize> {
        match format {
            ExportFormat::Csv => self.export_history_csv(ctx, uid, writer).await,
            ExportFormat::Json => Ok(self
                .export_statement_json(ctx, uid, writer)
                .await?
                .entries
                .len()),
        }
    }
}
