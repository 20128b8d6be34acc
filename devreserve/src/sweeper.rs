//! Background expiry sweeper.
//!
//! Reservations end by the clock, not by an explicit write: a hold whose
//! `end_time` has passed is already inactive everywhere the ledger is
//! consulted. The sweeper's only job is to drag the advisory status column
//! back to `FREE` for environments whose hold has lapsed. It never touches
//! reservation rows.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::api::models::environments::EnvironmentStatus;
use crate::config::SweeperConfig;
use crate::db::handlers::environments::EnvironmentFilter;
use crate::db::handlers::repository::Repository;
use crate::db::handlers::{Environments, Reservations};
use crate::types::abbrev_uuid;

/// One sweep cycle: free every reserved environment whose hold has lapsed.
///
/// A single `cycle_now` is used for every activity check so one cycle
/// cannot flap on a reservation expiring mid-scan. Per-environment
/// failures are logged and skipped so one bad row cannot stall the rest
/// of the pool.
///
/// Returns the number of environments freed.
#[instrument(skip(pool), err)]
pub async fn sweep_once(pool: &PgPool) -> anyhow::Result<usize> {
    let mut conn = pool.acquire().await?;

    let reserved = Environments::new(&mut conn)
        .list(&EnvironmentFilter {
            status: Some(EnvironmentStatus::Reserved),
        })
        .await?;
    let cycle_now: DateTime<Utc> = Utc::now();

    let mut freed = 0;
    for environment in reserved {
        match free_if_lapsed(&mut conn, environment.id, cycle_now).await {
            Ok(true) => freed += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(
                    environment_id = %abbrev_uuid(&environment.id),
                    error = %e,
                    "failed to sweep environment, will retry next cycle"
                );
            }
        }
    }

    Ok(freed)
}

/// Free one environment if its reservation ledger shows no active hold.
///
/// The activity check and the status write are two statements, not one
/// compare-and-set: a release followed by a fresh reserve landing between
/// them gets its `RESERVED` overwritten. The new hold stays valid in the
/// ledger; only the advisory status lags until the next reconciliation.
async fn free_if_lapsed(
    conn: &mut sqlx::PgConnection,
    environment_id: crate::types::EnvironmentId,
    cycle_now: DateTime<Utc>,
) -> crate::db::errors::Result<bool> {
    if Reservations::new(&mut *conn)
        .active_for_environment(environment_id, cycle_now)
        .await?
        .is_some()
    {
        // Hold is still live
        return Ok(false);
    }

    // Convergent write: a concurrent release doing the same thing is fine
    Environments::new(conn)
        .set_status(environment_id, EnvironmentStatus::Free)
        .await?;

    info!(
        environment_id = %abbrev_uuid(&environment_id),
        "freed environment after reservation expiry"
    );
    Ok(true)
}

/// Long-running sweeper task. Ticks at the configured interval until the
/// cancellation token fires.
#[instrument(skip(pool, config, shutdown_token))]
pub async fn sweeper_task(pool: PgPool, config: SweeperConfig, shutdown_token: tokio_util::sync::CancellationToken) {
    let mut interval = tokio::time::interval(config.interval);
    // Missed ticks (e.g. a slow database) should not burst-fire
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(interval = ?config.interval, "expiry sweeper started");

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                info!("expiry sweeper shutting down");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = sweep_once(&pool).await {
                    // Substrate failure: skip this cycle, the next tick retries
                    warn!(error = %e, "sweep cycle failed");
                }
            }
        }
    }
}
