use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use srvana::application::access::Actor;
use srvana::application::marketplace::{Marketplace, NewOrder, NewUser};
use srvana::application::stores::Stores;
use srvana::config::MarketplaceConfig;
use srvana::domain::dispute::Resolution;
use srvana::domain::ledger::TransactionType;
use srvana::domain::money::Amount;
use srvana::domain::order::OrderStatus;
use srvana::domain::review::Rating;
use srvana::domain::user::UserRole;
use srvana::infrastructure::clock::SystemClock;

fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

async fn register(market: &Marketplace, role: UserRole, name: &str) -> Actor {
    let user = market
        .register_user(NewUser {
            role,
            first_name: name.to_string(),
            last_name: "Test".to_string(),
            email: format!("{name}@example.com"),
            verified: true,
        })
        .await
        .unwrap();
    Actor::from(&user)
}

fn new_order() -> NewOrder {
    NewOrder {
        client: None,
        service_id: 4,
        order_type: "scheduled".to_string(),
        problem_description: "Broken heater".to_string(),
        requested_location: "Giza".to_string(),
        scheduled_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
    }
}

/// Sum of every wallet balance across all users.
async fn money_in_wallets(market: &Marketplace) -> Decimal {
    market
        .wallets()
        .await
        .unwrap()
        .iter()
        .map(|user| user.wallet.total().value())
        .sum()
}

/// Net money that entered or left the marketplace according to the ledger.
async fn external_flow(market: &Marketplace) -> Decimal {
    market
        .ledger()
        .await
        .unwrap()
        .iter()
        .map(|entry| match entry.kind {
            TransactionType::Deposit => entry.amount.value(),
            TransactionType::Withdrawal | TransactionType::PlatformFee => -entry.amount.value(),
            _ => Decimal::ZERO,
        })
        .sum()
}

#[tokio::test]
async fn test_money_is_conserved_across_every_flow() {
    let market = Marketplace::new(
        Stores::in_memory(),
        Box::new(SystemClock),
        MarketplaceConfig::default(),
    );
    let admin = register(&market, UserRole::Admin, "admin").await;
    let client = register(&market, UserRole::Client, "client").await;
    let tech = register(&market, UserRole::Technician, "tech").await;
    let rival = register(&market, UserRole::Technician, "rival").await;

    market.deposit(&client, amount(dec!(1000))).await.unwrap();

    // Marketplace order, manual release with commission, then a review.
    let released = market.create_order(&client, new_order()).await.unwrap();
    let offer = market
        .submit_offer(&tech, released.id, None, amount(dec!(333.33)), None)
        .await
        .unwrap();
    market
        .submit_offer(&rival, released.id, None, amount(dec!(350)), None)
        .await
        .unwrap();
    market
        .accept_offer(&client, released.id, offer.id)
        .await
        .unwrap();
    market.start_job(&tech, released.id).await.unwrap();
    market.mark_job_done(&tech, released.id).await.unwrap();
    market.release_funds(&client, released.id).await.unwrap();
    market
        .submit_review(&client, released.id, Rating::new(4).unwrap(), None)
        .await
        .unwrap();

    // Direct hire, cancelled while escrowed.
    let (cancelled, direct) = market
        .make_direct_offer(&client, tech.user_id, new_order(), amount(dec!(150)), None)
        .await
        .unwrap();
    market
        .respond_to_direct_offer(&tech, direct.id, true, None)
        .await
        .unwrap();
    market
        .accept_offer(&client, cancelled.id, direct.id)
        .await
        .unwrap();
    let cancelled = market.cancel_order(&client, cancelled.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Refunded);

    // Disputed order split by the admin.
    let disputed = market.create_order(&client, new_order()).await.unwrap();
    let offer = market
        .submit_offer(&rival, disputed.id, None, amount(dec!(240)), None)
        .await
        .unwrap();
    market
        .accept_offer(&client, disputed.id, offer.id)
        .await
        .unwrap();
    let dispute = market
        .initiate_dispute(&rival, disputed.id, "Client refuses to pay".to_string())
        .await
        .unwrap();
    market
        .resolve_dispute(
            &admin,
            dispute.id,
            Resolution::SplitPayment {
                client_refund: Some(amount(dec!(40))),
                technician_payout: Some(amount(dec!(100))),
            },
            "Half the job was done".to_string(),
        )
        .await
        .unwrap();

    // Rejected actions in between change nothing.
    assert!(market.withdraw(&client, amount(dec!(5000))).await.is_err());
    assert!(market.release_funds(&client, released.id).await.is_err());

    market.settle_pending(&tech, tech.user_id).await.unwrap();
    market.withdraw(&tech, amount(dec!(100))).await.unwrap();

    let wallets = market.wallets().await.unwrap();
    assert!(wallets.iter().all(|user| {
        user.wallet.available.value() >= Decimal::ZERO
            && user.wallet.in_escrow.value() >= Decimal::ZERO
            && user.wallet.pending.value() >= Decimal::ZERO
    }));
    assert_eq!(money_in_wallets(&market).await, external_flow(&market).await);

    // 5% of 333.33 rounds to 16.67.
    let fee = market
        .ledger()
        .await
        .unwrap()
        .into_iter()
        .find(|entry| entry.kind == TransactionType::PlatformFee)
        .unwrap();
    assert_eq!(fee.amount.value(), dec!(16.67));

    let tech_user = market.user(&admin, tech.user_id).await.unwrap();
    assert_eq!(tech_user.overall_rating, Some(dec!(4.00)));
    assert_eq!(tech_user.wallet.available.value(), dec!(216.66));
}
