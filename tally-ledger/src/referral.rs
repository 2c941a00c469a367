use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tally_core::{Points, Reason, ReferralCode, RelatedRef};

use crate::{
    BalanceMutator, Database, DatabaseError, DatabaseResult, LedgerContext, LedgerError,
    LedgerResult, PrimaryKey,
};

/// Produces candidate referral codes
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> ReferralCode;
}

/// Draws codes at random
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn next_code(&self) -> ReferralCode {
        ReferralCode::generate()
    }
}

/// Issues referral codes and redeems them when new users sign up
pub struct ReferralIssuer<Db> {
    context: LedgerContext<Db>,
    balances: BalanceMutator<Db>,
    codes: Arc<dyn CodeSource>,
}

/// The outcome of a successful referral redemption
#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub referrer_id: PrimaryKey,
    /// The new user's balance after the welcome bonus, if it was awarded
    pub welcome_balance: Option<Points>,
    /// Whether the referrer received their reward
    pub referrer_rewarded: bool,
}

/// How well a user's referral code has performed
#[derive(Debug, Clone, Serialize)]
pub struct ReferralStats {
    pub code: Option<String>,
    pub referred_users: i64,
    pub points_earned: Points,
}

impl<Db> ReferralIssuer<Db>
where
    Db: Database,
{
    pub fn new(context: &LedgerContext<Db>) -> Self {
        Self {
            context: context.clone(),
            balances: BalanceMutator::new(context),
            codes: Arc::new(RandomCodes),
        }
    }

    /// Uses `codes` instead of random codes when issuing
    pub fn with_codes(mut self, codes: impl CodeSource + 'static) -> Self {
        self.codes = Arc::new(codes);
        self
    }

    /// Returns the referral code of a user, issuing one if they don't have one yet.
    ///
    /// Concurrent calls for the same user all return the same code, since the code
    /// is only stored if the user still has none.
    pub async fn issue_code_if_absent(&self, user_id: PrimaryKey) -> LedgerResult<ReferralCode> {
        if let Some(code) = self.existing_code(user_id).await? {
            return Ok(code);
        }

        let database = &self.context.database;
        let attempts = self.context.config.max_code_attempts;

        for attempt in 1..=attempts {
            let candidate = self.codes.next_code();

            let taken = database
                .user_by_referral_code(candidate.as_str())
                .await
                .optional()?
                .is_some();

            if taken {
                debug!("Referral code {} is taken ({}/{})", candidate, attempt, attempts);
                continue;
            }

            match database
                .set_referral_code_if_absent(user_id, candidate.as_str())
                .await
            {
                Ok(true) => {
                    info!("Issued referral code {} to user {}", candidate, user_id);
                    return Ok(candidate);
                }
                // Someone else issued a code first, so theirs wins
                Ok(false) => {
                    let stored = self.existing_code(user_id).await?;
                    let missing = format!("no readable referral code for user {}", user_id);

                    return stored.ok_or_else(|| DatabaseError::Internal(missing.into()).into());
                }
                Err(e) if e.is_conflict() => {
                    debug!(
                        "Referral code {} was taken concurrently ({}/{})",
                        candidate, attempt, attempts
                    );
                }
                Err(e) => return Err(LedgerError::for_user(user_id)(e)),
            }
        }

        error!(
            "Could not find a free referral code for user {} after {} attempts",
            user_id, attempts
        );

        Err(LedgerError::CodeGenerationExhausted)
    }

    /// Normalizes a code entered by a user, rejecting anything that can't be a code
    pub fn validate_and_normalize(&self, code: &str) -> LedgerResult<ReferralCode> {
        ReferralCode::parse(code).map_err(|_| LedgerError::InvalidCode)
    }

    /// Links a newly registered user to the owner of `code` and rewards both of them.
    ///
    /// The link is only made once per user, which is what keeps the rewards from being
    /// handed out twice. The two rewards are independent and a failure of one
    /// does not undo the other.
    pub async fn redeem_on_signup(
        &self,
        new_user_id: PrimaryKey,
        code: &str,
    ) -> LedgerResult<Redemption> {
        let code = self
            .validate_and_normalize(code)
            .map_err(|_| LedgerError::CodeNotFound)?;

        let referrer = self
            .context
            .database
            .user_by_referral_code(code.as_str())
            .await
            .optional()?
            .ok_or(LedgerError::CodeNotFound)?;

        if referrer.id == new_user_id {
            return Err(LedgerError::SelfReferral);
        }

        let linked = self
            .context
            .database
            .set_referrer_if_absent(new_user_id, referrer.id)
            .await
            .map_err(|e| match e {
                // The owner of the code was removed after the lookup
                DatabaseError::NotFound {
                    resource: "referrer",
                    ..
                } => LedgerError::CodeNotFound,
                e => LedgerError::for_user(new_user_id)(e),
            })?;

        if !linked {
            return Err(LedgerError::AlreadyReferred(new_user_id));
        }

        info!("User {} was referred by user {}", new_user_id, referrer.id);

        let rewards = &self.context.config.rewards;

        let welcome_balance = self
            .balances
            .apply_delta(
                new_user_id,
                rewards.referral_welcome,
                Reason::ReferralWelcome,
                Some(RelatedRef::user(referrer.id)),
            )
            .await
            .map_err(|e| warn!("Welcome bonus for user {} failed: {}", new_user_id, e))
            .ok();

        let referrer_rewarded = self
            .balances
            .apply_delta(
                referrer.id,
                rewards.referral_reward,
                Reason::ReferralReward,
                Some(RelatedRef::user(new_user_id)),
            )
            .await
            .map_err(|e| warn!("Referral reward for user {} failed: {}", referrer.id, e))
            .is_ok();

        Ok(Redemption {
            referrer_id: referrer.id,
            welcome_balance,
            referrer_rewarded,
        })
    }

    /// Returns a user's code, how many users it brought in, and what they earned from it
    pub async fn stats(&self, user_id: PrimaryKey) -> LedgerResult<ReferralStats> {
        let database = &self.context.database;

        let user = database
            .user_by_id(user_id)
            .await
            .map_err(LedgerError::for_user(user_id))?;

        let referred_users = database.count_referred_users(user_id).await?;
        let points_earned = database
            .sum_ledger_entries_by_reason(user_id, Reason::ReferralReward)
            .await?;

        Ok(ReferralStats {
            code: user.referral_code,
            referred_users,
            points_earned,
        })
    }

    async fn existing_code(&self, user_id: PrimaryKey) -> LedgerResult<Option<ReferralCode>> {
        let user = self
            .context
            .database
            .user_by_id(user_id)
            .await
            .map_err(LedgerError::for_user(user_id))?;

        // Codes are stored normalized, anything else is a corrupt row
        user.referral_code
            .map(|code| ReferralCode::parse(&code))
            .transpose()
            .map_err(|e| DatabaseError::Internal(Box::new(e)).into())
    }
}

impl<Db> Clone for ReferralIssuer<Db> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            balances: self.balances.clone(),
            codes: self.codes.clone(),
        }
    }
}
