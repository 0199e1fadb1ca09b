use crate::domain::user::User;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow {
    user: u64,
    role: String,
    available: String,
    in_escrow: String,
    pending: String,
}

impl From<&User> for WalletRow {
    fn from(user: &User) -> Self {
        Self {
            user: user.id,
            role: user.role.to_string(),
            available: format!("{:.2}", user.wallet.available.value()),
            in_escrow: format!("{:.2}", user.wallet.in_escrow.value()),
            pending: format!("{:.2}", user.wallet.pending.value()),
        }
    }
}

/// Writes the wallet report: one row per user, ordered by id.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, mut users: Vec<User>) -> Result<()> {
        users.sort_by_key(|user| user.id);
        for user in &users {
            self.writer.serialize(WalletRow::from(user))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
