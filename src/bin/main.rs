// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use winc_ledger_rs::{
    ChargebackReceiptId, CreateQuoteParams, CurrencyType, DataItemId, Engine, EngineConfig,
    LedgerError, ManualClock, PaymentProvider, PaymentReceiptId, RecordPaymentParams,
    ReservationId, TopUpQuote, UserAddress, UserAddressType, Winc,
};

/// Winc Ledger - Replay ledger commands
///
/// Reads engine commands from a CSV file, applies them in order against a
/// fresh engine, and writes the final balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "winc-ledger")]
#[command(about = "Replays credit ledger commands and prints balances", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: command,user,reference,amount,currency,detail
    /// Example: winc-ledger commands.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML settings file; `LEDGER__*` environment variables override it
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let replay = match replay_commands(config, BufReader::new(file)) {
        Ok(replay) => replay,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_balances(&replay.engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum ReplayError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("unknown reference '{0}'")]
    UnknownReference(String),
    #[error("invalid command: {0}")]
    Invalid(String),
}

/// Raw CSV record matching the input format.
///
/// Fields: `command, user, reference, amount, currency, detail`
#[derive(Debug, Deserialize)]
struct CommandRecord {
    command: String,
    user: Option<String>,
    reference: Option<String>,
    amount: Option<String>,
    currency: Option<String>,
    detail: Option<String>,
}

/// A parsed command. References are names local to the input file.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    /// Quote a top-up; `detail` holds space separated promo codes.
    Quote {
        user: UserAddress,
        reference: String,
        amount: Decimal,
        currency: CurrencyType,
        promo_codes: Vec<String>,
    },
    /// Pay a quote in full; `detail` is the receipt id.
    Pay { reference: String, receipt: String },
    /// Charge back a paid quote; `detail` is the reason.
    Chargeback { reference: String, reason: String },
    /// Reserve `amount` winc for the data item named by `reference`.
    Reserve {
        user: UserAddress,
        reference: String,
        amount: Winc,
    },
    Finalize { reference: String },
    Refund { reference: String },
    Expire { reference: String },
    Sweep,
    /// Move the replay clock forward by `amount` seconds.
    Advance { by: chrono::Duration },
}

fn required(field: Option<String>, name: &str) -> Result<String, ReplayError> {
    field
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ReplayError::Invalid(format!("missing {name}")))
}

impl CommandRecord {
    fn into_command(self) -> Result<Command, ReplayError> {
        let command = self.command.to_lowercase();
        let reference = || required(self.reference.clone(), "reference");

        match command.as_str() {
            "quote" => Ok(Command::Quote {
                user: UserAddress::new(required(self.user.clone(), "user")?),
                reference: reference()?,
                amount: Decimal::from_str(&required(self.amount.clone(), "amount")?)
                    .map_err(|e| ReplayError::Invalid(e.to_string()))?,
                currency: CurrencyType::new(self.currency.clone().unwrap_or_else(|| "usd".to_string())),
                promo_codes: self
                    .detail
                    .as_deref()
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            }),
            "pay" => {
                let reference = reference()?;
                let receipt = self.detail.clone().unwrap_or_else(|| format!("receipt-{reference}"));
                Ok(Command::Pay { reference, receipt })
            }
            "chargeback" => Ok(Command::Chargeback {
                reference: reference()?,
                reason: self.detail.clone().unwrap_or_else(|| "chargeback".to_string()),
            }),
            "reserve" => Ok(Command::Reserve {
                user: UserAddress::new(required(self.user.clone(), "user")?),
                reference: reference()?,
                amount: Winc::from_str(&required(self.amount.clone(), "amount")?)
                    .map_err(|e| ReplayError::Invalid(e.to_string()))?,
            }),
            "finalize" => Ok(Command::Finalize {
                reference: reference()?,
            }),
            "refund" => Ok(Command::Refund {
                reference: reference()?,
            }),
            "expire" => Ok(Command::Expire {
                reference: reference()?,
            }),
            "sweep" => Ok(Command::Sweep),
            "advance" => {
                let seconds: i64 = required(self.amount.clone(), "amount")?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ReplayError::Invalid(e.to_string()))?;
                let by = chrono::Duration::try_seconds(seconds)
                    .filter(|by| *by >= chrono::Duration::zero())
                    .ok_or_else(|| {
                        ReplayError::Invalid(format!("cannot advance the clock by {seconds} seconds"))
                    })?;
                Ok(Command::Advance { by })
            }
            other => Err(ReplayError::Invalid(format!("unknown command '{other}'"))),
        }
    }
}

/// Engine plus the names the input file gave to its quotes and reservations.
struct Replay {
    engine: Engine,
    clock: Arc<ManualClock>,
    quotes: HashMap<String, TopUpQuote>,
    reservations: HashMap<String, ReservationId>,
}

impl Replay {
    fn new(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let engine = Engine::builder(config).clock(clock.clone()).build();
        Self {
            engine,
            clock,
            quotes: HashMap::new(),
            reservations: HashMap::new(),
        }
    }

    fn quote(&self, reference: &str) -> Result<&TopUpQuote, ReplayError> {
        self.quotes
            .get(reference)
            .ok_or_else(|| ReplayError::UnknownReference(reference.to_string()))
    }

    fn reservation(&self, reference: &str) -> Result<&ReservationId, ReplayError> {
        self.reservations
            .get(reference)
            .ok_or_else(|| ReplayError::UnknownReference(reference.to_string()))
    }

    fn apply(&mut self, command: Command) -> Result<(), ReplayError> {
        match command {
            Command::Quote {
                user,
                reference,
                amount,
                currency,
                promo_codes,
            } => {
                let quote = self.engine.quote_top_up(CreateQuoteParams {
                    destination_address: user,
                    destination_address_type: UserAddressType::Arweave,
                    payment_amount: amount,
                    currency_type: currency,
                    payment_provider: PaymentProvider::Stripe,
                    promo_codes,
                })?;
                self.quotes.insert(reference, quote);
            }
            Command::Pay { reference, receipt } => {
                let quote = self.quote(&reference)?;
                self.engine.confirm_payment(RecordPaymentParams {
                    top_up_quote_id: quote.top_up_quote_id.clone(),
                    payment_receipt_id: PaymentReceiptId::new(receipt),
                    payment_amount: quote.quoted_payment_amount,
                    currency_type: quote.currency_type.clone(),
                    transaction_id: None,
                })?;
            }
            Command::Chargeback { reference, reason } => {
                let quote = self.quote(&reference)?;
                self.engine.record_chargeback(
                    &quote.top_up_quote_id,
                    &ChargebackReceiptId::new(format!("chargeback-{reference}")),
                    &reason,
                )?;
            }
            Command::Reserve {
                user,
                reference,
                amount,
            } => {
                let reservation =
                    self.engine
                        .reserve_balance(&DataItemId::new(reference.clone()), &user, amount)?;
                self.reservations
                    .insert(reference, reservation.reservation_id);
            }
            Command::Finalize { reference } => {
                self.engine
                    .finalize_reservation(self.reservation(&reference)?)?;
            }
            Command::Refund { reference } => {
                self.engine.refund_reservation(self.reservation(&reference)?)?;
            }
            Command::Expire { reference } => {
                let quote = self.quote(&reference)?;
                self.engine.expire_quote(&quote.top_up_quote_id)?;
            }
            Command::Sweep => {
                self.engine.expire_stale_quotes();
            }
            Command::Advance { by } => {
                self.clock.advance(by);
            }
        }
        Ok(())
    }
}

/// Replays commands from a CSV reader.
///
/// Rows are streamed in order. Malformed rows and rejected commands are
/// logged and skipped; they never stop the replay.
///
/// # CSV Format
///
/// Expected columns: `command, user, reference, amount, currency, detail`
/// - `command`: quote, pay, chargeback, reserve, finalize, refund, expire, sweep, advance
/// - `reference`: name of the quote or data item the command acts on
/// - `amount`: payment amount (quote), network price in winc (reserve), or seconds (advance)
/// - `detail`: promo codes (quote), receipt id (pay), or reason (chargeback)
///
/// # Example
///
/// ```csv
/// command,user,reference,amount,currency,detail
/// quote,alice,q1,1000,usd,
/// pay,,q1,,,receipt-1
/// reserve,alice,item-1,5000,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
fn replay_commands<R: Read>(config: EngineConfig, reader: R) -> Result<Replay, csv::Error> {
    let mut replay = Replay::new(config);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<CommandRecord>().enumerate() {
        let command = match result.map_err(|e| ReplayError::Invalid(e.to_string())) {
            Ok(record) => record.into_command(),
            Err(e) => Err(e),
        };
        let outcome = command.and_then(|command| replay.apply(command));
        if let Err(e) = outcome {
            log::warn!("skipping row {}: {}", row + 1, e);
        }
    }

    Ok(replay)
}

#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    user: &'a str,
    balance: Winc,
}

/// Writes every user's balance as CSV, ordered by address.
///
/// # CSV Format
///
/// Columns: `user, balance`
fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for (user, balance) in engine.balances() {
        wtr.serialize(BalanceRow {
            user: user.as_str(),
            balance,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
