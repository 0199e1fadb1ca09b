use super::access::Actor;
use super::marketplace::Marketplace;
use super::unit_of_work::{EntryDraft, Sequence};
use crate::domain::ledger::{EntryId, LedgerEntry, TransactionStatus, TransactionType};
use crate::domain::money::Amount;
use crate::domain::notification::NotificationKind;
use crate::domain::payment_method::{PaymentMethod, PaymentMethodId, expiration_date};
use crate::domain::ports::{BillingData, CallbackKind, PaymentGateway};
use crate::domain::user::UserId;
use crate::error::{MarketplaceError, Result};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// How the client finishes a top-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkout {
    /// Hosted card form.
    Iframe(String),
    /// 3-D Secure challenge for a saved card.
    Redirect(String),
    /// The saved card was charged; the webhook confirms the deposit.
    Charged,
}

/// Everything the client needs to finish a card top-up.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositSession {
    pub checkout: Checkout,
    /// Paymob order id, echoed back by the webhook.
    pub external_id: String,
    pub entry_id: EntryId,
}

impl DepositSession {
    /// Where to send the client, if anywhere.
    pub fn iframe_url(&self) -> Option<&str> {
        match &self.checkout {
            Checkout::Iframe(url) | Checkout::Redirect(url) => Some(url),
            Checkout::Charged => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited,
    Failed,
    AlreadyProcessed,
    CardSaved,
}

/// Token callbacks are tagged `TOKEN` in the JSON envelope; flat ones are
/// recognised by their card fields.
fn callback_kind(params: &Map<String, Value>) -> CallbackKind {
    let tagged = matches!(
        params.get("type"),
        Some(Value::String(t)) if t.eq_ignore_ascii_case("TOKEN")
    );
    if tagged || (params.contains_key("token") && params.contains_key("masked_pan")) {
        CallbackKind::Token
    } else {
        CallbackKind::Transaction
    }
}

/// Callbacks arrive either as flat query parameters or as a JSON body with
/// the payload under `obj` and the signature at the top level.
fn callback_fields(params: &Map<String, Value>) -> Map<String, Value> {
    match params.get("obj") {
        Some(Value::Object(obj)) => {
            let mut fields = obj.clone();
            if let Some(hmac) = params.get("hmac") {
                fields.entry("hmac").or_insert_with(|| hmac.clone());
            }
            fields
        }
        _ => params.clone(),
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(text)
}

fn callback_order_id(fields: &Map<String, Value>) -> Option<String> {
    match fields.get("order")? {
        Value::Object(order) => order.get("id").and_then(text),
        other => text(other),
    }
}

fn callback_succeeded(fields: &Map<String, Value>) -> bool {
    match fields.get("success") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn deposit_owner(entry: &LedgerEntry) -> Result<UserId> {
    entry.destination.or(entry.source).ok_or_else(|| {
        MarketplaceError::ValidationError(format!("Deposit {} has no owning user.", entry.id))
    })
}

impl Marketplace {
    fn payment_gateway(&self) -> Result<&dyn PaymentGateway> {
        self.gateway
            .as_deref()
            .ok_or_else(|| MarketplaceError::GatewayError("No payment gateway configured.".to_string()))
    }

    async fn pending_deposit(&self, external_id: &str) -> Result<LedgerEntry> {
        self.stores
            .ledger
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| {
                MarketplaceError::NotFound(format!("No deposit found for payment order {external_id}"))
            })
    }

    /// Starts a card top-up: registers the payment with the gateway and
    /// records a pending deposit until the webhook confirms it.
    ///
    /// With `saved_card`, the caller's tokenized card is charged directly
    /// and the result is either a charge or a 3-D Secure redirect. A card
    /// owned by someone else is rejected before the gateway is called.
    pub async fn initiate_deposit(
        &self,
        actor: &Actor,
        amount: Amount,
        saved_card: Option<PaymentMethodId>,
    ) -> Result<DepositSession> {
        let gateway = self.payment_gateway()?;
        let amount_cents = amount.cents()?;
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let user = unit.user(actor.user_id).await?;
        let card = match saved_card {
            Some(id) => match unit.payment_method(id).await {
                Ok(card) if card.belongs_to(user.id) => Some(card),
                Ok(_) | Err(MarketplaceError::NotFound(_)) => {
                    warn!(user_id = user.id, payment_method = id, "saved card rejected");
                    return Err(MarketplaceError::ValidationError(format!(
                        "Invalid payment method {id}."
                    )));
                }
                Err(err) => return Err(err),
            },
            None => None,
        };

        let entry_id = unit
            .record(
                EntryDraft::new(TransactionType::Deposit, amount)
                    .from(user.id)
                    .to(user.id)
                    .status(TransactionStatus::Pending)
                    .payment_method(if card.is_some() { "paymob_saved_card" } else { "paymob" }),
            )
            .await?;

        let currency = &self.config.currency;
        let auth_token = gateway.authenticate().await?;
        let external_id = gateway
            .register_order(&auth_token, amount_cents, entry_id, currency)
            .await?;
        let billing = BillingData {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            phone_number: String::new(),
        };
        let payment_key = gateway
            .payment_key(&auth_token, &external_id, &billing, amount_cents, currency)
            .await?;

        let checkout = match &card {
            None => Some(Checkout::Iframe(gateway.checkout_url(&payment_key))),
            Some(card) => {
                let payment = gateway.pay_with_token(&card.token, &payment_key).await?;
                match payment.redirect_url {
                    Some(url) => Some(Checkout::Redirect(url)),
                    None if payment.success || payment.pending => Some(Checkout::Charged),
                    None => None,
                }
            }
        };

        let mut entry = unit.ledger_entry(entry_id).await?;
        entry.external_id = Some(external_id.clone());
        if checkout.is_none() {
            entry.status = TransactionStatus::Failed;
        }
        unit.save_ledger_entry(entry);
        unit.commit().await?;

        let Some(checkout) = checkout else {
            warn!(user_id = user.id, entry_id, %external_id, "saved card payment declined");
            return Err(MarketplaceError::GatewayError(
                "Saved card payment was declined.".to_string(),
            ));
        };
        info!(user_id = user.id, entry_id, %external_id, %amount, ?checkout, "deposit initiated");
        Ok(DepositSession {
            checkout,
            external_id,
            entry_id,
        })
    }

    /// Applies a signed gateway callback.
    ///
    /// Transaction callbacks settle the matching pending deposit; replays for
    /// a completed deposit are acknowledged without crediting the wallet
    /// again. Token callbacks save the card for the deposit's owner.
    pub async fn handle_webhook(&self, params: &Map<String, Value>) -> Result<WebhookOutcome> {
        let gateway = self.payment_gateway()?;
        let kind = callback_kind(params);
        let fields = callback_fields(params);
        if !gateway.verify_webhook(kind, &fields) {
            warn!(?kind, "webhook rejected: invalid signature");
            return Err(MarketplaceError::InvalidSignature);
        }
        match kind {
            CallbackKind::Transaction => self.settle_deposit(&fields).await,
            CallbackKind::Token => self.save_card(&fields).await,
        }
    }

    async fn settle_deposit(&self, fields: &Map<String, Value>) -> Result<WebhookOutcome> {
        let external_id = callback_order_id(fields).ok_or_else(|| {
            MarketplaceError::ValidationError("Webhook carries no order id.".to_string())
        })?;

        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut entry = self.pending_deposit(&external_id).await?;
        if entry.kind != TransactionType::Deposit {
            return Err(MarketplaceError::ValidationError(format!(
                "Transaction {} is not a deposit.",
                entry.id
            )));
        }
        if entry.status == TransactionStatus::Completed {
            info!(entry_id = entry.id, %external_id, "webhook already processed");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let outcome = if callback_succeeded(fields) {
            let user_id = deposit_owner(&entry)?;
            let mut user = unit.user(user_id).await?;
            user.wallet.deposit(entry.amount)?;
            unit.save_user(user);
            entry.status = TransactionStatus::Completed;
            entry.timestamp = unit.now();
            unit.notify(
                user_id,
                NotificationKind::DepositCompleted,
                format!("Your deposit of {} was added to your wallet.", entry.amount),
                None,
                None,
            )
            .await?;
            WebhookOutcome::Credited
        } else {
            entry.status = TransactionStatus::Failed;
            WebhookOutcome::Failed
        };
        let entry_id = entry.id;
        unit.save_ledger_entry(entry);

        unit.commit().await?;
        info!(entry_id, %external_id, ?outcome, "webhook processed");
        Ok(outcome)
    }

    /// Stores a tokenized card for the user who owns the deposit named by
    /// the callback's `order_id`.
    async fn save_card(&self, fields: &Map<String, Value>) -> Result<WebhookOutcome> {
        let token = field(fields, "token").filter(|t| !t.is_empty()).ok_or_else(|| {
            MarketplaceError::ValidationError("Token callback carries no token.".to_string())
        })?;
        let external_id = field(fields, "order_id").ok_or_else(|| {
            MarketplaceError::ValidationError("Token callback carries no order id.".to_string())
        })?;

        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let deposit = self.pending_deposit(&external_id).await?;
        if deposit.kind != TransactionType::Deposit {
            return Err(MarketplaceError::ValidationError(format!(
                "Transaction {} is not a deposit.",
                deposit.id
            )));
        }
        let user_id = deposit_owner(&deposit)?;
        let saved = self.stores.payment_methods.for_user(user_id).await?;
        if saved.iter().any(|card| card.token == token) {
            info!(user_id, %external_id, "card already saved");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let id = unit.allocate(Sequence::PaymentMethod).await?;
        let card = PaymentMethod {
            id,
            user: user_id,
            card_type: field(fields, "card_subtype").unwrap_or_default(),
            masked_pan: field(fields, "masked_pan").unwrap_or_default(),
            expiration_date: expiration_date(
                field(fields, "expiry_year").as_deref(),
                field(fields, "expiry_month").as_deref(),
            ),
            token,
            created_at: unit.now(),
        };
        info!(user_id, payment_method = id, card = card.last_four_digits(), "card saved");
        unit.save_payment_method(card);
        unit.commit().await?;
        Ok(WebhookOutcome::CardSaved)
    }

    /// The caller's saved cards, oldest first.
    pub async fn payment_methods(&self, actor: &Actor) -> Result<Vec<PaymentMethod>> {
        self.stores.payment_methods.for_user(actor.user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::marketplace::NewUser;
    use crate::application::stores::Stores;
    use crate::config::{MarketplaceConfig, PaymobConfig};
    use crate::domain::ports::TokenPayment;
    use crate::domain::user::UserRole;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::paymob::{PaymobClient, webhook_hmac};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type TokenCharges = Arc<Mutex<Vec<(String, String)>>>;

    /// Gateway double answering like the Paymob sandbox.
    struct FakeGateway {
        signer: PaymobClient,
        token_payment: TokenPayment,
        charges: TokenCharges,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn authenticate(&self) -> Result<String> {
            Ok("fake_auth_token".to_string())
        }

        async fn register_order(
            &self,
            _: &str,
            _: i64,
            merchant_order_id: u64,
            _: &str,
        ) -> Result<String> {
            Ok((12344 + merchant_order_id).to_string())
        }

        async fn payment_key(
            &self,
            _: &str,
            _: &str,
            _: &BillingData,
            _: i64,
            _: &str,
        ) -> Result<String> {
            Ok("fake_payment_key".to_string())
        }

        async fn pay_with_token(&self, card_token: &str, payment_key: &str) -> Result<TokenPayment> {
            self.charges
                .lock()
                .unwrap()
                .push((card_token.to_string(), payment_key.to_string()));
            Ok(self.token_payment.clone())
        }

        fn checkout_url(&self, payment_key: &str) -> String {
            self.signer.checkout_url(payment_key)
        }

        fn verify_webhook(&self, kind: CallbackKind, params: &Map<String, Value>) -> bool {
            self.signer.verify_webhook(kind, params)
        }
    }

    fn charged() -> TokenPayment {
        TokenPayment {
            success: true,
            pending: false,
            redirect_url: None,
        }
    }

    async fn register(market: &Marketplace, email: &str) -> Actor {
        let user = market
            .register_user(NewUser {
                role: UserRole::Client,
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                email: email.to_string(),
                verified: false,
            })
            .await
            .unwrap();
        Actor::from(&user)
    }

    async fn market_with_gateway(token_payment: TokenPayment) -> (Marketplace, Actor, TokenCharges) {
        let signer = PaymobClient::new(PaymobConfig {
            iframe_id: Some("456".to_string()),
            hmac_secret: Some("mysecret".to_string()),
            ..PaymobConfig::default()
        });
        let charges = TokenCharges::default();
        let market = Marketplace::new(
            Stores::in_memory(),
            Box::new(SystemClock),
            MarketplaceConfig::default(),
        )
        .with_gateway(Box::new(FakeGateway {
            signer,
            token_payment,
            charges: charges.clone(),
        }));
        let client = register(&market, "test@example.com").await;
        (market, client, charges)
    }

    async fn market_with_client() -> (Marketplace, Actor) {
        let (market, client, _) = market_with_gateway(charged()).await;
        (market, client)
    }

    fn signed(mut params: Map<String, Value>) -> Map<String, Value> {
        let signature = webhook_hmac(CallbackKind::Transaction, &params, "mysecret").unwrap();
        params.insert("hmac".to_string(), json!(signature));
        params
    }

    fn callback(success: bool) -> Map<String, Value> {
        match json!({ "success": success, "order": { "id": 12345 }, "amount_cents": 10000 }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    /// A signed `TOKEN` envelope for the deposit registered as `order_id`.
    fn token_callback(order_id: &str) -> Map<String, Value> {
        let Value::Object(obj) = json!({
            "id": 77,
            "token": "tkn_123456789",
            "masked_pan": "xxxx-xxxx-xxxx-1234",
            "card_subtype": "Visa",
            "email": "test@example.com",
            "merchant_id": 5,
            "created_at": "2025-01-01T10:00:00",
            "order_id": order_id,
            "expiry_year": "2026",
            "expiry_month": "12",
        }) else {
            unreachable!()
        };
        let signature = webhook_hmac(CallbackKind::Token, &obj, "mysecret").unwrap();
        let mut envelope = Map::new();
        envelope.insert("type".to_string(), json!("TOKEN"));
        envelope.insert("obj".to_string(), Value::Object(obj));
        envelope.insert("hmac".to_string(), json!(signature));
        envelope
    }

    /// Runs a hosted-checkout deposit whose token callback saves a card.
    async fn saved_card(market: &Marketplace, client: &Actor) -> PaymentMethod {
        let session = market
            .initiate_deposit(client, Amount::new(dec!(100)).unwrap(), None)
            .await
            .unwrap();
        let outcome = market
            .handle_webhook(&token_callback(&session.external_id))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::CardSaved);
        market.payment_methods(client).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_initiate_deposit_records_pending_entry() {
        let (market, client) = market_with_client().await;
        let session = market
            .initiate_deposit(&client, Amount::new(dec!(100)).unwrap(), None)
            .await
            .unwrap();

        let url = session.iframe_url().unwrap();
        assert!(url.contains("fake_payment_key"));
        assert!(url.contains("/iframes/456"));
        assert_eq!(session.external_id, "12345");

        let entry = market.ledger().await.unwrap().remove(0);
        assert_eq!(entry.id, session.entry_id);
        assert_eq!(entry.status, TransactionStatus::Pending);
        assert_eq!(entry.external_id.as_deref(), Some("12345"));
        // Nothing is credited before the gateway confirms.
        let user = market.user(&client, client.user_id).await.unwrap();
        assert!(user.wallet.available.is_zero());
    }

    #[tokio::test]
    async fn test_webhook_credits_once() {
        let (market, client) = market_with_client().await;
        market
            .initiate_deposit(&client, Amount::new(dec!(100)).unwrap(), None)
            .await
            .unwrap();

        let params = signed(callback(true));
        assert_eq!(market.handle_webhook(&params).await.unwrap(), WebhookOutcome::Credited);
        assert_eq!(
            market.handle_webhook(&params).await.unwrap(),
            WebhookOutcome::AlreadyProcessed
        );

        let user = market.user(&client, client.user_id).await.unwrap();
        assert_eq!(user.wallet.available.value(), dec!(100));
        let notes = market.notifications_for(&client).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::DepositCompleted);
    }

    #[tokio::test]
    async fn test_webhook_json_envelope() {
        let (market, client) = market_with_client().await;
        market
            .initiate_deposit(&client, Amount::new(dec!(100)).unwrap(), None)
            .await
            .unwrap();

        let inner = signed(callback(true));
        let mut envelope = Map::new();
        envelope.insert("type".to_string(), json!("TRANSACTION"));
        envelope.insert("hmac".to_string(), inner["hmac"].clone());
        let mut obj = inner;
        obj.remove("hmac");
        envelope.insert("obj".to_string(), Value::Object(obj));

        assert_eq!(market.handle_webhook(&envelope).await.unwrap(), WebhookOutcome::Credited);
    }

    #[tokio::test]
    async fn test_webhook_failure_and_bad_signature() {
        let (market, client) = market_with_client().await;
        market
            .initiate_deposit(&client, Amount::new(dec!(100)).unwrap(), None)
            .await
            .unwrap();

        let mut forged = signed(callback(true));
        forged.insert("amount_cents".to_string(), json!(999999));
        assert!(matches!(
            market.handle_webhook(&forged).await,
            Err(MarketplaceError::InvalidSignature)
        ));

        let declined = signed(callback(false));
        assert_eq!(market.handle_webhook(&declined).await.unwrap(), WebhookOutcome::Failed);
        let entry = market.ledger().await.unwrap().remove(0);
        assert_eq!(entry.status, TransactionStatus::Failed);
        let user = market.user(&client, client.user_id).await.unwrap();
        assert!(user.wallet.available.is_zero());
    }

    #[tokio::test]
    async fn test_webhook_unknown_order() {
        let (market, _) = market_with_client().await;
        let params = signed(callback(true));
        assert!(matches!(
            market.handle_webhook(&params).await,
            Err(MarketplaceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_token_webhook_saves_card_once() {
        let (market, client) = market_with_client().await;
        let card = saved_card(&market, &client).await;

        assert_eq!(card.user, client.user_id);
        assert_eq!(card.token, "tkn_123456789");
        assert_eq!(card.card_type, "Visa");
        assert_eq!(card.last_four_digits(), "1234");
        assert_eq!(card.expiration_date.as_deref(), Some("2026/12"));

        let replay = market.handle_webhook(&token_callback("12345")).await.unwrap();
        assert_eq!(replay, WebhookOutcome::AlreadyProcessed);
        assert_eq!(market.payment_methods(&client).await.unwrap().len(), 1);
        // Saving a card does not touch the deposit.
        let entry = market.ledger().await.unwrap().remove(0);
        assert_eq!(entry.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_token_webhook_with_bad_signature_saves_nothing() {
        let (market, client) = market_with_client().await;
        market
            .initiate_deposit(&client, Amount::new(dec!(100)).unwrap(), None)
            .await
            .unwrap();

        let mut forged = token_callback("12345");
        if let Some(Value::Object(obj)) = forged.get_mut("obj") {
            obj.insert("token".to_string(), json!("tkn_stolen"));
        }
        assert!(matches!(
            market.handle_webhook(&forged).await,
            Err(MarketplaceError::InvalidSignature)
        ));
        assert!(market.payment_methods(&client).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saved_card_deposit_charges_token() {
        let (market, client, charges) = market_with_gateway(charged()).await;
        let card = saved_card(&market, &client).await;

        let session = market
            .initiate_deposit(&client, Amount::new(dec!(250)).unwrap(), Some(card.id))
            .await
            .unwrap();

        assert_eq!(session.checkout, Checkout::Charged);
        assert_eq!(session.iframe_url(), None);
        assert_eq!(
            charges.lock().unwrap().as_slice(),
            &[("tkn_123456789".to_string(), "fake_payment_key".to_string())]
        );
        let entry = market.ledger().await.unwrap().pop().unwrap();
        assert_eq!(entry.id, session.entry_id);
        assert_eq!(entry.status, TransactionStatus::Pending);
        assert_eq!(entry.payment_method.as_deref(), Some("paymob_saved_card"));
    }

    #[tokio::test]
    async fn test_saved_card_3ds_redirect() {
        let challenge = TokenPayment {
            success: false,
            pending: true,
            redirect_url: Some("https://paymob.com/3ds-challenge".to_string()),
        };
        let (market, client, _) = market_with_gateway(challenge).await;
        let card = saved_card(&market, &client).await;

        let session = market
            .initiate_deposit(&client, Amount::new(dec!(100)).unwrap(), Some(card.id))
            .await
            .unwrap();

        assert_eq!(session.iframe_url(), Some("https://paymob.com/3ds-challenge"));
        assert!(matches!(session.checkout, Checkout::Redirect(_)));
    }

    #[tokio::test]
    async fn test_declined_saved_card_marks_deposit_failed() {
        let (market, client, _) = market_with_gateway(TokenPayment::default()).await;
        let card = saved_card(&market, &client).await;

        let err = market
            .initiate_deposit(&client, Amount::new(dec!(100)).unwrap(), Some(card.id))
            .await
            .unwrap_err();

        assert!(matches!(err, MarketplaceError::GatewayError(_)));
        let entry = market.ledger().await.unwrap().pop().unwrap();
        assert_eq!(entry.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_other_users_card_is_rejected() {
        let (market, owner, charges) = market_with_gateway(charged()).await;
        let card = saved_card(&market, &owner).await;
        let intruder = register(&market, "other@example.com").await;
        let entries_before = market.ledger().await.unwrap().len();

        let err = market
            .initiate_deposit(&intruder, Amount::new(dec!(100)).unwrap(), Some(card.id))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::ValidationError(_)));

        let missing = market
            .initiate_deposit(&intruder, Amount::new(dec!(100)).unwrap(), Some(404))
            .await
            .unwrap_err();
        assert!(matches!(missing, MarketplaceError::ValidationError(_)));

        assert!(charges.lock().unwrap().is_empty());
        assert_eq!(market.ledger().await.unwrap().len(), entries_before);
        assert!(market.payment_methods(&intruder).await.unwrap().is_empty());
    }
}
