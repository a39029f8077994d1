//! 内存仓储
//!
//! 以 dashmap + parking_lot 实现全部仓储接口，原子性保证与 PostgreSQL 实现一致：
//! - 每个账户一把互斥锁，余额读改写与流水追加在锁内完成
//! - 幂等键通过 dashmap entry API 原子占位
//! - 兑换码领取持有兑换码分片写锁，依次检查同账户流水、可领取状态、入账并自增
//! - 短信去重在单个分片写锁内完成
//!
//! 加锁顺序固定为：兑换码分片 -> 账户锁 -> 幂等键分片，锁内不跨 await。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::ledger_repo::{checked_balance, resolve_replay};
use super::traits::{
    AccountRepositoryTrait, CountryRepositoryTrait, GiftCodeRepositoryTrait,
    LedgerRepositoryTrait, SmsRepositoryTrait,
};
use crate::error::{LedgerError, Result};
use crate::models::{
    Account, Country, EntryStatus, GiftCode, GiftCodeClaim, LedgerCommand, LedgerEntry, LedgerReason,
    LedgerReceipt, NewAccount, NewCountry, NewGiftCode, NewSmsRecord, PhoneLease, SmsRecord,
    WalletStats, parse_numbers,
};

type SmsKey = (String, String, String);

/// 账户状态：余额投影与该账户的全部流水
struct AccountState {
    account: Account,
    entries: Vec<LedgerEntry>,
}

impl AccountState {
    /// 余额必须等于流水之和；违反即为实现缺陷
    fn debug_check_consistency(&self) {
        debug_assert_eq!(
            self.account.balance,
            self.entries.iter().map(|e| e.delta).sum::<i64>(),
            "账户 {} 余额与流水不一致",
            self.account.id
        );
        debug_assert!(self.account.balance >= 0, "账户 {} 余额为负", self.account.id);
    }
}

/// 内存仓储
pub struct InMemoryStore {
    accounts: DashMap<Uuid, Arc<Mutex<AccountState>>>,
    usernames: DashMap<String, Uuid>,
    referral_codes: DashMap<String, Uuid>,
    references: DashMap<(LedgerReason, String), LedgerEntry>,
    next_entry_id: AtomicI64,
    gift_codes: DashMap<String, GiftCode>,
    countries: DashMap<Uuid, Country>,
    leases: RwLock<Vec<PhoneLease>>,
    sms: DashMap<SmsKey, SmsRecord>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            usernames: DashMap::new(),
            referral_codes: DashMap::new(),
            references: DashMap::new(),
            next_entry_id: AtomicI64::new(1),
            gift_codes: DashMap::new(),
            countries: DashMap::new(),
            leases: RwLock::new(Vec::new()),
            sms: DashMap::new(),
        }
    }

    fn account_state(&self, id: Uuid) -> Option<Arc<Mutex<AccountState>>> {
        self.accounts.get(&id).map(|state| Arc::clone(state.value()))
    }

    fn new_entry(&self, command: &LedgerCommand, balance_after: i64) -> LedgerEntry {
        LedgerEntry {
            id: self.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id: command.account_id,
            delta: command.delta,
            reason: command.reason,
            reference_id: command.reference_id.clone(),
            status: EntryStatus::Completed,
            description: command.description.clone(),
            balance_after,
            created_at: Utc::now(),
        }
    }

    /// 在账户锁内追加流水并更新余额投影
    fn commit_entry(state: &mut AccountState, entry: LedgerEntry) -> LedgerReceipt {
        let receipt = LedgerReceipt::applied(&entry);
        state.account.balance = entry.balance_after;
        state.account.version += 1;
        state.account.updated_at = entry.created_at;
        state.entries.push(entry);
        state.debug_check_consistency();
        receipt
    }

    fn apply_locked(&self, command: &LedgerCommand) -> Result<LedgerReceipt> {
        let state = self
            .account_state(command.account_id)
            .ok_or(LedgerError::AccountNotFound(command.account_id))?;
        let mut state = state.lock();

        let available = state.account.balance;
        let new_balance = checked_balance(available, command)?;
        let insufficient = || LedgerError::InsufficientBalance {
            required: -command.delta,
            available,
        };

        match &command.reference_id {
            Some(reference_id) => {
                match self.references.entry((command.reason, reference_id.clone())) {
                    Entry::Occupied(existing) => resolve_replay(command, existing.get()),
                    Entry::Vacant(slot) => {
                        if new_balance < 0 {
                            return Err(insufficient());
                        }
                        let entry = self.new_entry(command, new_balance);
                        slot.insert(entry.clone());
                        Ok(Self::commit_entry(&mut state, entry))
                    }
                }
            }
            None => {
                if new_balance < 0 {
                    return Err(insufficient());
                }
                let entry = self.new_entry(command, new_balance);
                Ok(Self::commit_entry(&mut state, entry))
            }
        }
    }
}

#[async_trait]
impl LedgerRepositoryTrait for InMemoryStore {
    async fn apply(&self, command: &LedgerCommand) -> Result<LedgerReceipt> {
        self.apply_locked(command)
    }

    async fn find_entry(
        &self,
        reason: LedgerReason,
        reference_id: &str,
    ) -> Result<Option<LedgerEntry>> {
        Ok(self
            .references
            .get(&(reason, reference_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn list_entries(&self, account_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>> {
        let Some(state) = self.account_state(account_id) else {
            return Ok(Vec::new());
        };
        let state = state.lock();
        Ok(state
            .entries
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn wallet_stats(&self) -> Result<WalletStats> {
        let states: Vec<_> = self
            .accounts
            .iter()
            .map(|state| Arc::clone(state.value()))
            .collect();

        let mut stats = WalletStats::default();
        for state in states {
            let state = state.lock();
            stats.total_entries += state.entries.len() as i64;
            stats.total_purchased += state
                .entries
                .iter()
                .filter(|e| e.reason == LedgerReason::Purchase && e.status == EntryStatus::Completed)
                .map(|e| e.delta)
                .sum::<i64>();
        }
        Ok(stats)
    }
}

#[async_trait]
impl AccountRepositoryTrait for InMemoryStore {
    async fn create_account(&self, account: &NewAccount, opening_balance: i64) -> Result<Account> {
        match self.usernames.entry(account.username.clone()) {
            Entry::Occupied(_) => {
                return Err(LedgerError::Validation(format!(
                    "用户名已存在: {}",
                    account.username
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(account.id);
            }
        }
        match self.referral_codes.entry(account.referral_code.clone()) {
            Entry::Occupied(_) => {
                self.usernames.remove(&account.username);
                return Err(LedgerError::Validation(format!(
                    "推荐码已存在: {}",
                    account.referral_code
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(account.id);
            }
        }

        let now = Utc::now();
        let created = Account {
            id: account.id,
            username: account.username.clone(),
            balance: 0,
            version: 0,
            referral_code: account.referral_code.clone(),
            referred_by: account.referred_by.clone(),
            successful_referrals: 0,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut state = AccountState {
            account: created,
            entries: Vec::new(),
        };

        if opening_balance > 0 {
            let command = LedgerCommand::new(account.id, opening_balance, LedgerReason::Opening)
                .with_reference(account.id.to_string())
                .with_description("开户赠送积分");
            let entry = self.new_entry(&command, opening_balance);
            self.references
                .insert((LedgerReason::Opening, account.id.to_string()), entry.clone());
            Self::commit_entry(&mut state, entry);
        }

        let snapshot = state.account.clone();
        self.accounts.insert(account.id, Arc::new(Mutex::new(state)));
        Ok(snapshot)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.account_state(id).map(|state| state.lock().account.clone()))
    }

    async fn find_by_referral_code(&self, referral_code: &str) -> Result<Option<Account>> {
        let id = self.referral_codes.get(referral_code).map(|id| *id.value());
        match id {
            Some(id) => self.get_account(id).await,
            None => Ok(None),
        }
    }

    async fn increment_successful_referrals(&self, id: Uuid) -> Result<()> {
        if let Some(state) = self.account_state(id) {
            state.lock().account.successful_referrals += 1;
        }
        Ok(())
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(state) = self.account_state(id) {
            state.lock().account.last_login_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl GiftCodeRepositoryTrait for InMemoryStore {
    async fn create_gift_code(&self, gift_code: &NewGiftCode) -> Result<GiftCode> {
        let code = GiftCode::normalize(&gift_code.code);
        match self.gift_codes.entry(code.clone()) {
            Entry::Occupied(_) => Err(LedgerError::Validation(format!("兑换码已存在: {}", code))),
            Entry::Vacant(slot) => {
                let created = GiftCode {
                    id: Uuid::now_v7(),
                    code,
                    credits_amount: gift_code.credits_amount,
                    max_claims: gift_code.max_claims,
                    claimed_count: 0,
                    expiry_date: gift_code.expiry_date,
                    is_active: true,
                    created_at: Utc::now(),
                };
                slot.insert(created.clone());
                Ok(created)
            }
        }
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<GiftCode>> {
        Ok(self.gift_codes.get(code).map(|g| g.value().clone()))
    }

    async fn list(&self) -> Result<Vec<GiftCode>> {
        let mut all: Vec<GiftCode> = self.gift_codes.iter().map(|g| g.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn set_active(&self, code: &str, is_active: bool) -> Result<bool> {
        match self.gift_codes.get_mut(code) {
            Some(mut gift) => {
                gift.is_active = is_active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim(
        &self,
        code: &str,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<GiftCodeClaim> {
        let Some(mut gift) = self.gift_codes.get_mut(code) else {
            return Ok(GiftCodeClaim::Unclaimable(None));
        };

        let reference_id = GiftCode::claim_reference(code, account_id);
        if self
            .references
            .contains_key(&(LedgerReason::GiftCode, reference_id))
        {
            return Ok(GiftCodeClaim::AlreadyClaimed);
        }
        if !gift.is_claimable(now) {
            return Ok(GiftCodeClaim::Unclaimable(Some(gift.clone())));
        }

        let receipt = self.apply_locked(&gift.claim_command(account_id))?;
        if receipt.replayed {
            return Ok(GiftCodeClaim::AlreadyClaimed);
        }
        gift.claimed_count += 1;

        Ok(GiftCodeClaim::Credited {
            receipt,
            gift_code: gift.clone(),
        })
    }
}

#[async_trait]
impl CountryRepositoryTrait for InMemoryStore {
    async fn create_country(&self, country: &NewCountry) -> Result<Country> {
        let created = Country {
            id: Uuid::now_v7(),
            name: country.name.clone(),
            code: country.code.clone(),
            numbers_file: country.numbers_file.clone(),
            total_numbers: parse_numbers(&country.numbers_file).len() as i32,
            used_numbers: 0,
            created_at: Utc::now(),
        };
        self.countries.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_country(&self, id: Uuid) -> Result<Option<Country>> {
        Ok(self.countries.get(&id).map(|c| c.value().clone()))
    }

    async fn increment_used_numbers(&self, id: Uuid) -> Result<()> {
        if let Some(mut country) = self.countries.get_mut(&id) {
            country.used_numbers += 1;
        }
        Ok(())
    }

    async fn record_lease(&self, lease: &PhoneLease) -> Result<()> {
        self.leases.write().push(lease.clone());
        Ok(())
    }

    async fn list_leases(&self, account_id: Uuid, limit: i64) -> Result<Vec<PhoneLease>> {
        Ok(self
            .leases
            .read()
            .iter()
            .rev()
            .filter(|l| l.account_id == account_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SmsRepositoryTrait for InMemoryStore {
    async fn insert_if_absent(&self, record: &NewSmsRecord) -> Result<bool> {
        match self.sms.entry(record.natural_key()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(SmsRecord {
                    id: Uuid::now_v7(),
                    phone_number: record.phone_number.clone(),
                    sender: record.sender.clone(),
                    message: record.message.clone(),
                    received_at: record.received_at,
                    created_at: Utc::now(),
                });
                Ok(true)
            }
        }
    }

    async fn list_by_phone(&self, phone_number: &str, limit: i64) -> Result<Vec<SmsRecord>> {
        let mut records: Vec<SmsRecord> = self
            .sms
            .iter()
            .filter(|r| r.value().phone_number == phone_number)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}
