//! Replica binary
//!
//! Boots a genesis state, merges a deposit subtree, proposes one transfer
//! batch against an in-memory rollup and lets the challenger replay it.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rollup_core::{
    Account, AccountRegistry, MockSignatureScheme, SecretKey, SignatureScheme, StateTree,
    Transfer, Tx,
};
use rollup_host::{Challenger, Config, InMemoryRollup, Proposer, SignedTx};

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load config from environment
    let config = Config::from_env();
    let codec = config.codec()?;

    info!("Configuration:");
    info!("  State tree depth:   {}", config.state_tree_depth);
    info!("  Registry depth:     {}", config.registry_depth);
    info!("  Max txs per commit: {}", config.max_txs_per_commit);
    info!("  Domain:             0x{}", hex::encode(config.domain));

    // Genesis: three accounts of token 1
    let scheme = MockSignatureScheme;
    let secrets: Vec<SecretKey> = (1..=3u8).map(|seed| SecretKey([seed; 32])).collect();
    let mut registry = AccountRegistry::new(config.registry_depth)?;
    let mut state = StateTree::new(config.state_tree_depth)?;
    for secret in &secrets {
        let pubkey_index = registry.register(scheme.public_key(secret))?;
        state.create_state(Account::new(
            pubkey_index,
            1,
            codec.parse_units("1000.0")?,
            0,
        ))?;
    }

    let client = Arc::new(InMemoryRollup::new(
        state.root(),
        registry.root(),
        [0u8; 20],
        config.replayer()?,
    )?);
    let proposer = Proposer::new(
        config.clone(),
        Arc::new(scheme),
        Arc::clone(&client),
        state,
        registry,
    )?;
    let mut challenger = Challenger::new(&config, Arc::clone(&client))?;

    // Deposits land in their own batch before any transfer builds on them
    let deposits = (0..1usize << config.deposit_subtree_depth)
        .map(|_| Ok(Account::new(0, 1, codec.parse_units("5.0")?, 0)))
        .collect::<Result<Vec<_>>>()?;
    let (deposit_id, subtree) = proposer.finalise_deposits(deposits).await?;
    info!(
        "Deposit batch {} merged subtree at position {}",
        deposit_id, subtree.position
    );

    let tx = Transfer {
        from_index: 0,
        to_index: 1,
        token_type: 1,
        amount: codec.parse_units("39.99")?,
        fee: codec.parse_units("0.01")?,
        nonce: 0,
    };
    let signature = scheme.sign(&config.domain, &tx.message(), &secrets[0]);
    proposer
        .build_transfer_commitment(&[SignedTx { tx, signature }], 2)
        .await?;
    let id = proposer.submit().await?;

    let witness = proposer.witness_json(id, 0).await?;
    info!("Witness for batch {}: {} bytes of JSON", id, witness.len());
    let verdict = challenger.check_commitment_json(id, 0, &witness).await?;
    info!("Batch {} verdict: {:?}", id, verdict);

    let state = proposer.state();
    let state = state.read().await;
    for index in 0..3 {
        if let Some(account) = state.get_state(index) {
            info!(
                "  Account {}: {} (nonce {})",
                index,
                codec.format_units(account.balance),
                account.nonce
            );
        }
    }
    Ok(())
}
