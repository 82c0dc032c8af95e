//! FundMe: single-file Solana program for an owner-withdrawable funding ledger
//! with a USD-denominated minimum contribution priced through an aggregator feed.

#![deny(unsafe_code)]

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::{FunderEntry, LedgerHeader};

    pub const MAGIC: u64 = 0x46554e444d450000; // "FUNDME\0\0"
    pub const VERSION: u32 = 1;

    pub const HEADER_LEN: usize = size_of::<LedgerHeader>();
    pub const ENTRY_LEN: usize = size_of::<FunderEntry>();
    pub const MAX_FUNDERS: usize = 64;
    pub const LEDGER_LEN: usize = HEADER_LEN + MAX_FUNDERS * ENTRY_LEN;

    /// Lamports per SOL is 10^9.
    pub const NATIVE_DECIMALS: u32 = 9;
    pub const USD_DECIMALS: u32 = 18;
    pub const MINIMUM_USD_E18: u128 = 50 * 1_000_000_000_000_000_000;

    pub const FEED_MAGIC: u64 = 0x4147475256330000; // "AGGRV3\0\0"
    pub const FEED_LEN: usize = 48;
    pub const FEED_OFF_MAGIC: usize = 0;
    pub const FEED_OFF_DECIMALS: usize = 8;
    pub const FEED_OFF_ROUND_ID: usize = 16;
    pub const FEED_OFF_ANSWER: usize = 24;
    pub const FEED_OFF_UPDATED_AT: usize = 40;
}

// 2. mod math
pub mod math {
    const LO_MASK: u128 = u64::MAX as u128;

    /// Full 128x128 -> 256 bit product as `(hi, lo)`.
    pub fn widening_mul(a: u128, b: u128) -> (u128, u128) {
        let (a0, a1) = (a & LO_MASK, a >> 64);
        let (b0, b1) = (b & LO_MASK, b >> 64);

        let p00 = a0 * b0;
        let p01 = a0 * b1;
        let p10 = a1 * b0;
        let p11 = a1 * b1;

        let mid = (p00 >> 64) + (p01 & LO_MASK) + (p10 & LO_MASK);
        let lo = (p00 & LO_MASK) | (mid << 64);
        let hi = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
        (hi, lo)
    }

    /// `floor(a * b / d)` with a 256-bit intermediate. `None` on a zero divisor
    /// or when the quotient does not fit in 128 bits.
    pub fn mul_div_floor(a: u128, b: u128, d: u128) -> Option<u128> {
        if d == 0 {
            return None;
        }
        let (hi, lo) = widening_mul(a, b);
        if hi == 0 {
            return Some(lo / d);
        }
        if hi >= d {
            return None;
        }

        // Restoring division; rem < d holds at the top of every step.
        let mut rem = hi;
        let mut quo: u128 = 0;
        for i in (0..128).rev() {
            let carry = rem >> 127;
            rem = (rem << 1) | ((lo >> i) & 1);
            quo <<= 1;
            if carry == 1 || rem >= d {
                rem = rem.wrapping_sub(d);
                quo |= 1;
            }
        }
        Some(quo)
    }

    pub fn pow10(exp: u32) -> Option<u128> {
        10u128.checked_pow(exp)
    }
}

// 3. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive as _;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use thiserror::Error;

    /// Custom program errors. The discriminant is the `ProgramError::Custom` code.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Error, FromPrimitive)]
    pub enum FundMeError {
        #[error("contribution is below the minimum USD value")]
        InsufficientContribution,
        #[error("signer is not the ledger owner")]
        NotOwner,
        #[error("payout to the owner failed")]
        TransferFailed,
        #[error("funder index out of range")]
        IndexOutOfRange,
        #[error("ledger is not initialized")]
        NotInitialized,
        #[error("ledger is already initialized")]
        AlreadyInitialized,
        #[error("unsupported ledger version")]
        InvalidVersion,
        #[error("ledger account has the wrong length")]
        InvalidLedgerLen,
        #[error("price feed account does not match the ledger")]
        InvalidPriceFeedKey,
        #[error("price feed data is invalid")]
        OracleInvalid,
        #[error("price feed answer is stale")]
        OracleStale,
        #[error("expected signer")]
        ExpectedSigner,
        #[error("expected writable account")]
        ExpectedWritable,
        #[error("funder table is full")]
        LedgerFull,
        #[error("arithmetic overflow")]
        ArithmeticOverflow,
        #[error("ledger account is not rent exempt")]
        NotRentExempt,
        #[error("no price feed configured for this cluster")]
        MissingPriceFeed,
    }

    impl FundMeError {
        pub fn from_code(code: u32) -> Option<Self> {
            Self::from_u32(code)
        }
    }

    impl From<FundMeError> for ProgramError {
        fn from(e: FundMeError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for FundMeError {
        fn type_of() -> &'static str {
            "FundMeError"
        }
    }

    impl PrintProgramError for FundMeError {
        fn print<E>(&self)
        where
            E: 'static
                + std::error::Error
                + DecodeError<E>
                + PrintProgramError
                + num_traits::FromPrimitive,
        {
            msg!("FundMeError: {}", self);
        }
    }
}

// 4. mod ix
pub mod ix {
    use arrayref::array_ref;
    use solana_program::{
        instruction::{AccountMeta, Instruction as SolInstruction},
        program_error::ProgramError,
        pubkey::Pubkey,
        system_program,
        sysvar,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Instruction {
        Initialize { price_feed: Pubkey, max_staleness_secs: u64 },
        Fund { amount: u64 },
        Withdraw,
        CheaperWithdraw,
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                0 => {
                    let price_feed = read_pubkey(&mut rest)?;
                    let max_staleness_secs = read_u64(&mut rest)?;
                    Ok(Instruction::Initialize { price_feed, max_staleness_secs })
                }
                1 => {
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::Fund { amount })
                }
                2 => Ok(Instruction::Withdraw),
                3 => Ok(Instruction::CheaperWithdraw),
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }

        pub fn encode(&self) -> Vec<u8> {
            match self {
                Instruction::Initialize { price_feed, max_staleness_secs } => {
                    let mut data = Vec::with_capacity(41);
                    data.push(0);
                    data.extend_from_slice(price_feed.as_ref());
                    data.extend_from_slice(&max_staleness_secs.to_le_bytes());
                    data
                }
                Instruction::Fund { amount } => {
                    let mut data = Vec::with_capacity(9);
                    data.push(1);
                    data.extend_from_slice(&amount.to_le_bytes());
                    data
                }
                Instruction::Withdraw => vec![2],
                Instruction::CheaperWithdraw => vec![3],
            }
        }
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        if input.len() < 8 { return Err(ProgramError::InvalidInstructionData); }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(u64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    fn read_pubkey(input: &mut &[u8]) -> Result<Pubkey, ProgramError> {
        if input.len() < 32 { return Err(ProgramError::InvalidInstructionData); }
        let (bytes, rest) = input.split_at(32);
        *input = rest;
        Ok(Pubkey::new_from_array(*array_ref![bytes, 0, 32]))
    }

    // Client-side builders. Account order matches the processor.

    pub fn initialize(
        program_id: &Pubkey,
        owner: &Pubkey,
        ledger: &Pubkey,
        price_feed: &Pubkey,
        max_staleness_secs: u64,
    ) -> SolInstruction {
        SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new_readonly(*owner, true),
                AccountMeta::new(*ledger, false),
                AccountMeta::new_readonly(sysvar::rent::id(), false),
            ],
            data: Instruction::Initialize { price_feed: *price_feed, max_staleness_secs }.encode(),
        }
    }

    pub fn fund(
        program_id: &Pubkey,
        funder: &Pubkey,
        ledger: &Pubkey,
        price_feed: &Pubkey,
        amount: u64,
    ) -> SolInstruction {
        SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*funder, true),
                AccountMeta::new(*ledger, false),
                AccountMeta::new_readonly(*price_feed, false),
                AccountMeta::new_readonly(sysvar::clock::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: Instruction::Fund { amount }.encode(),
        }
    }

    pub fn withdraw(program_id: &Pubkey, owner: &Pubkey, ledger: &Pubkey) -> SolInstruction {
        withdraw_with(program_id, owner, ledger, Instruction::Withdraw)
    }

    pub fn cheaper_withdraw(program_id: &Pubkey, owner: &Pubkey, ledger: &Pubkey) -> SolInstruction {
        withdraw_with(program_id, owner, ledger, Instruction::CheaperWithdraw)
    }

    fn withdraw_with(program_id: &Pubkey, owner: &Pubkey, ledger: &Pubkey, ix: Instruction) -> SolInstruction {
        SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*owner, true),
                AccountMeta::new(*ledger, false),
            ],
            data: ix.encode(),
        }
    }
}

// 5. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::error::FundMeError;

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(FundMeError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(FundMeError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }
}

// 6. mod state
pub mod state {
    use bytemuck::{Pod, Zeroable};
    use core::cell::RefMut;
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::constants::{ENTRY_LEN, HEADER_LEN};

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct LedgerHeader {
        pub magic: u64,
        pub version: u32,
        pub funder_count: u32,
        pub owner: [u8; 32],
        pub price_feed: [u8; 32],
        pub max_staleness_secs: u64,
        pub rent_reserve: u64,
        pub total_funded: u64,
        pub _reserved: [u8; 8],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct FunderEntry {
        pub key: [u8; 32],
        pub amount: u64,
    }

    pub fn ledger_data_mut<'a, 'b>(ai: &'b AccountInfo<'a>) -> Result<RefMut<'b, &'a mut [u8]>, ProgramError> {
        Ok(ai.try_borrow_mut_data()?)
    }

    pub fn read_header(data: &[u8]) -> LedgerHeader {
        let mut h = LedgerHeader::zeroed();
        let src = &data[..HEADER_LEN];
        let dst = bytemuck::bytes_of_mut(&mut h);
        dst.copy_from_slice(src);
        h
    }

    pub fn write_header(data: &mut [u8], h: &LedgerHeader) {
        let src = bytemuck::bytes_of(h);
        let dst = &mut data[..HEADER_LEN];
        dst.copy_from_slice(src);
    }

    #[inline]
    pub const fn entry_offset(idx: usize) -> usize {
        HEADER_LEN + idx * ENTRY_LEN
    }

    pub fn read_entry(data: &[u8], idx: usize) -> FunderEntry {
        let off = entry_offset(idx);
        let mut e = FunderEntry::zeroed();
        bytemuck::bytes_of_mut(&mut e).copy_from_slice(&data[off..off + ENTRY_LEN]);
        e
    }

    pub fn write_entry(data: &mut [u8], idx: usize, e: &FunderEntry) {
        let off = entry_offset(idx);
        data[off..off + ENTRY_LEN].copy_from_slice(bytemuck::bytes_of(e));
    }

    /// Position of `key` among the first `count` entries.
    pub fn find_funder(data: &[u8], count: usize, key: &Pubkey) -> Option<usize> {
        let needle = key.to_bytes();
        (0..count).find(|&i| read_entry(data, i).key == needle)
    }

    /// Lamports above the reserve captured at initialization.
    pub fn held_balance(lamports: u64, h: &LedgerHeader) -> u64 {
        lamports.saturating_sub(h.rent_reserve)
    }
}

// 7. mod oracle
pub mod oracle {
    use arrayref::array_ref;
    use solana_program::{account_info::AccountInfo, program_error::ProgramError};
    use crate::{
        constants::{
            FEED_LEN, FEED_MAGIC, FEED_OFF_ANSWER, FEED_OFF_DECIMALS, FEED_OFF_MAGIC,
            FEED_OFF_ROUND_ID, FEED_OFF_UPDATED_AT, NATIVE_DECIMALS, USD_DECIMALS,
        },
        error::FundMeError,
        math,
    };

    /// Latest round of an aggregator feed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RoundData {
        pub round_id: u64,
        pub answer: i128,
        pub decimals: u8,
        pub updated_at: i64,
    }

    pub fn decode_feed(data: &[u8]) -> Result<RoundData, ProgramError> {
        if data.len() < FEED_LEN {
            return Err(FundMeError::OracleInvalid.into());
        }
        let data = array_ref![data, 0, FEED_LEN];
        if u64::from_le_bytes(*array_ref![data, FEED_OFF_MAGIC, 8]) != FEED_MAGIC {
            return Err(FundMeError::OracleInvalid.into());
        }
        Ok(RoundData {
            round_id: u64::from_le_bytes(*array_ref![data, FEED_OFF_ROUND_ID, 8]),
            answer: i128::from_le_bytes(*array_ref![data, FEED_OFF_ANSWER, 16]),
            decimals: data[FEED_OFF_DECIMALS],
            updated_at: i64::from_le_bytes(*array_ref![data, FEED_OFF_UPDATED_AT, 8]),
        })
    }

    /// Layout written by aggregator feeds; also used to stand up mock feeds on local clusters.
    pub fn encode_feed(decimals: u8, round_id: u64, answer: i128, updated_at: i64) -> [u8; FEED_LEN] {
        let mut data = [0u8; FEED_LEN];
        data[FEED_OFF_MAGIC..FEED_OFF_MAGIC + 8].copy_from_slice(&FEED_MAGIC.to_le_bytes());
        data[FEED_OFF_DECIMALS] = decimals;
        data[FEED_OFF_ROUND_ID..FEED_OFF_ROUND_ID + 8].copy_from_slice(&round_id.to_le_bytes());
        data[FEED_OFF_ANSWER..FEED_OFF_ANSWER + 16].copy_from_slice(&answer.to_le_bytes());
        data[FEED_OFF_UPDATED_AT..FEED_OFF_UPDATED_AT + 8].copy_from_slice(&updated_at.to_le_bytes());
        data
    }

    /// Reads the feed and rejects non-positive or stale answers.
    /// `max_staleness_secs == 0` disables the age check.
    pub fn read_round(feed_ai: &AccountInfo, now_ts: i64, max_staleness_secs: u64) -> Result<RoundData, ProgramError> {
        let data = feed_ai.try_borrow_data()?;
        let round = decode_feed(&data)?;

        if round.answer <= 0 {
            return Err(FundMeError::OracleInvalid.into());
        }

        if max_staleness_secs != 0 {
            let age = now_ts.saturating_sub(round.updated_at).max(0) as u64;
            if age > max_staleness_secs {
                return Err(FundMeError::OracleStale.into());
            }
        }

        Ok(round)
    }

    /// Answer rescaled to 18 decimals.
    pub fn price_e18(round: &RoundData) -> Result<u128, ProgramError> {
        if round.answer <= 0 {
            return Err(FundMeError::OracleInvalid.into());
        }
        let answer = round.answer as u128;
        let decimals = round.decimals as u32;

        let price = if decimals <= USD_DECIMALS {
            let mul = math::pow10(USD_DECIMALS - decimals).ok_or(FundMeError::ArithmeticOverflow)?;
            answer.checked_mul(mul).ok_or(FundMeError::ArithmeticOverflow)?
        } else {
            let div = math::pow10(decimals - USD_DECIMALS).ok_or(FundMeError::OracleInvalid)?;
            answer / div
        };

        if price == 0 {
            return Err(FundMeError::OracleInvalid.into());
        }
        Ok(price)
    }

    /// USD value (18 decimals) of `amount` lamports at `price_e18`.
    pub fn usd_value_e18(amount: u64, price_e18: u128) -> Result<u128, ProgramError> {
        let native_scale = math::pow10(NATIVE_DECIMALS).ok_or(FundMeError::ArithmeticOverflow)?;
        math::mul_div_floor(amount as u128, price_e18, native_scale)
            .ok_or_else(|| FundMeError::ArithmeticOverflow.into())
    }

    pub fn conversion_rate(amount: u64, round: &RoundData) -> Result<u128, ProgramError> {
        usd_value_e18(amount, price_e18(round)?)
    }
}

// 8. mod vault
pub mod vault {
    use solana_program::{account_info::AccountInfo, entrypoint::ProgramResult};
    #[cfg(not(target_os = "solana"))]
    use solana_program::program_error::ProgramError;
    #[cfg(target_os = "solana")]
    use solana_program::{program::invoke, system_instruction};

    use crate::error::FundMeError;

    /// Moves `amount` lamports from the funder into the ledger account.
    pub fn deposit<'a>(
        _system_program: &AccountInfo<'a>,
        funder: &AccountInfo<'a>,
        ledger: &AccountInfo<'a>,
        amount: u64,
    ) -> ProgramResult {
        #[cfg(target_os = "solana")]
        {
            let ix = system_instruction::transfer(funder.key, ledger.key, amount);
            invoke(&ix, &[funder.clone(), ledger.clone(), _system_program.clone()])
        }
        #[cfg(not(target_os = "solana"))]
        {
            let mut from = funder.try_borrow_mut_lamports()?;
            let mut to = ledger.try_borrow_mut_lamports()?;
            let new_from = from.checked_sub(amount).ok_or(ProgramError::InsufficientFunds)?;
            let new_to = to.checked_add(amount).ok_or(FundMeError::ArithmeticOverflow)?;
            **from = new_from;
            **to = new_to;
            Ok(())
        }
    }

    /// Pays `amount` lamports out of the program-owned ledger. Both balances are
    /// checked before either is written.
    pub fn payout<'a>(ledger: &AccountInfo<'a>, recipient: &AccountInfo<'a>, amount: u64) -> ProgramResult {
        if !recipient.is_writable {
            return Err(FundMeError::TransferFailed.into());
        }
        let mut from = ledger.try_borrow_mut_lamports()?;
        let mut to = recipient.try_borrow_mut_lamports()?;
        let new_from = from.checked_sub(amount).ok_or(FundMeError::TransferFailed)?;
        let new_to = to.checked_add(amount).ok_or(FundMeError::TransferFailed)?;
        **from = new_from;
        **to = new_to;
        Ok(())
    }
}

// 9. mod verify
/// Pure decision helpers shared by the processor and the kani proofs.
pub mod verify {
    use solana_program::pubkey::Pubkey;
    use crate::constants::{MAX_FUNDERS, MINIMUM_USD_E18};

    #[inline]
    pub fn owner_ok(stored: &[u8; 32], signer: &Pubkey) -> bool {
        *stored == signer.to_bytes()
    }

    #[inline]
    pub fn meets_minimum(usd_e18: u128) -> bool {
        usd_e18 >= MINIMUM_USD_E18
    }

    #[inline]
    pub fn has_slot(funder_count: usize, already_listed: bool) -> bool {
        already_listed || funder_count < MAX_FUNDERS
    }
}

// 10. mod processor
pub mod processor {
    use bytemuck::Zeroable;
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        msg,
        program_error::ProgramError,
        pubkey::Pubkey,
        sysvar::{clock::Clock, rent::Rent, Sysvar},
    };
    use crate::{
        accounts,
        constants::{LEDGER_LEN, MAGIC, VERSION},
        error::FundMeError,
        ix::Instruction,
        oracle,
        state::{self, FunderEntry, LedgerHeader},
        vault, verify,
    };

    /// Internal knob for the two withdrawal instructions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum WithdrawMode {
        /// Re-reads the list length from account data on every iteration.
        Naive,
        /// Reads the length once and clears the table in one pass.
        Cheaper,
    }

    fn ledger_guard(program_id: &Pubkey, ledger: &AccountInfo, data: &[u8]) -> Result<(), ProgramError> {
        accounts::expect_owner(ledger, program_id)?;
        if data.len() != LEDGER_LEN { return Err(FundMeError::InvalidLedgerLen.into()); }
        Ok(())
    }

    fn require_initialized(data: &[u8]) -> Result<LedgerHeader, ProgramError> {
        let h = state::read_header(data);
        if h.magic != MAGIC { return Err(FundMeError::NotInitialized.into()); }
        if h.version != VERSION { return Err(FundMeError::InvalidVersion.into()); }
        Ok(h)
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::Initialize { price_feed, max_staleness_secs } => {
                process_initialize(program_id, accounts, price_feed, max_staleness_secs)
            }
            Instruction::Fund { amount } => process_fund(program_id, accounts, amount),
            Instruction::Withdraw => process_withdraw(program_id, accounts, WithdrawMode::Naive),
            Instruction::CheaperWithdraw => process_withdraw(program_id, accounts, WithdrawMode::Cheaper),
        }
    }

    fn process_initialize<'a>(
        program_id: &Pubkey,
        accounts: &[AccountInfo<'a>],
        price_feed: Pubkey,
        max_staleness_secs: u64,
    ) -> ProgramResult {
        accounts::expect_len(accounts, 3)?;
        let a_owner = &accounts[0];
        let a_ledger = &accounts[1];
        let a_rent = &accounts[2];

        accounts::expect_signer(a_owner)?;
        accounts::expect_writable(a_ledger)?;

        let mut data = state::ledger_data_mut(a_ledger)?;
        ledger_guard(program_id, a_ledger, &data)?;

        let header = state::read_header(&data);
        if header.magic == MAGIC { return Err(FundMeError::AlreadyInitialized.into()); }

        let rent = Rent::from_account_info(a_rent)?;
        let reserve = a_ledger.lamports();
        if !rent.is_exempt(reserve, data.len()) {
            return Err(FundMeError::NotRentExempt.into());
        }

        data.fill(0);
        let new_header = LedgerHeader {
            magic: MAGIC,
            version: VERSION,
            funder_count: 0,
            owner: a_owner.key.to_bytes(),
            price_feed: price_feed.to_bytes(),
            max_staleness_secs,
            rent_reserve: reserve,
            total_funded: 0,
            _reserved: [0; 8],
        };
        state::write_header(&mut data, &new_header);

        msg!("initialize: owner={} price_feed={} reserve={}", a_owner.key, price_feed, reserve);
        Ok(())
    }

    fn process_fund<'a>(program_id: &Pubkey, accounts: &[AccountInfo<'a>], amount: u64) -> ProgramResult {
        accounts::expect_len(accounts, 5)?;
        let a_funder = &accounts[0];
        let a_ledger = &accounts[1];
        let a_feed = &accounts[2];
        let a_clock = &accounts[3];
        let a_system = &accounts[4];

        accounts::expect_signer(a_funder)?;
        accounts::expect_writable(a_funder)?;
        accounts::expect_writable(a_ledger)?;

        // Plan the update against a read-only view; the ledger must not be
        // borrowed while the system program moves lamports into it.
        let (mut header, slot, entry, usd) = {
            let data = a_ledger.try_borrow_data()?;
            ledger_guard(program_id, a_ledger, &data)?;
            let header = require_initialized(&data)?;

            if a_feed.key.to_bytes() != header.price_feed {
                return Err(FundMeError::InvalidPriceFeedKey.into());
            }

            let clock = Clock::from_account_info(a_clock)?;
            let round = oracle::read_round(a_feed, clock.unix_timestamp, header.max_staleness_secs)?;
            let usd = oracle::conversion_rate(amount, &round)?;
            if !verify::meets_minimum(usd) {
                return Err(FundMeError::InsufficientContribution.into());
            }

            let count = header.funder_count as usize;
            let existing = state::find_funder(&data, count, a_funder.key);
            if !verify::has_slot(count, existing.is_some()) {
                return Err(FundMeError::LedgerFull.into());
            }

            let (slot, mut entry) = match existing {
                Some(i) => (i, state::read_entry(&data, i)),
                None => (count, FunderEntry { key: a_funder.key.to_bytes(), amount: 0 }),
            };
            entry.amount = entry.amount.checked_add(amount).ok_or(FundMeError::ArithmeticOverflow)?;
            (header, slot, entry, usd)
        };

        header.total_funded = header.total_funded.checked_add(amount).ok_or(FundMeError::ArithmeticOverflow)?;
        if slot == header.funder_count as usize {
            header.funder_count += 1;
        }

        vault::deposit(a_system, a_funder, a_ledger, amount)?;

        let mut data = state::ledger_data_mut(a_ledger)?;
        state::write_entry(&mut data, slot, &entry);
        state::write_header(&mut data, &header);

        msg!("fund: funder={} amount={} usd_e18={} balance={}", a_funder.key, amount, usd, entry.amount);
        Ok(())
    }

    fn process_withdraw<'a>(program_id: &Pubkey, accounts: &[AccountInfo<'a>], mode: WithdrawMode) -> ProgramResult {
        accounts::expect_len(accounts, 2)?;
        let a_owner = &accounts[0];
        let a_ledger = &accounts[1];

        accounts::expect_signer(a_owner)?;
        accounts::expect_writable(a_ledger)?;

        let header = {
            let data = a_ledger.try_borrow_data()?;
            ledger_guard(program_id, a_ledger, &data)?;
            require_initialized(&data)?
        };

        if !verify::owner_ok(&header.owner, a_owner.key) {
            return Err(FundMeError::NotOwner.into());
        }

        // Pay first; the funder table is only cleared once the lamports moved.
        let payout = state::held_balance(a_ledger.lamports(), &header);
        vault::payout(a_ledger, a_owner, payout)?;

        let mut data = state::ledger_data_mut(a_ledger)?;
        let cleared = match mode {
            WithdrawMode::Naive => clear_funders_naive(&mut data),
            WithdrawMode::Cheaper => clear_funders_cheaper(&mut data, header),
        };

        msg!("withdraw: mode={:?} amount={} funders_cleared={}", mode, payout, cleared);
        Ok(())
    }

    fn clear_funders_naive(data: &mut [u8]) -> usize {
        let mut i = 0;
        while i < state::read_header(data).funder_count as usize {
            state::write_entry(data, i, &FunderEntry::zeroed());
            i += 1;
        }
        let mut header = state::read_header(data);
        header.funder_count = 0;
        header.total_funded = 0;
        state::write_header(data, &header);
        i
    }

    fn clear_funders_cheaper(data: &mut [u8], mut header: LedgerHeader) -> usize {
        let count = header.funder_count as usize;
        data[state::entry_offset(0)..state::entry_offset(count)].fill(0);
        header.funder_count = 0;
        header.total_funded = 0;
        state::write_header(data, &header);
        count
    }
}

// 11. mod view
/// Read-only accessors over raw ledger account data.
pub mod view {
    use solana_program::pubkey::Pubkey;
    use crate::{
        constants::{LEDGER_LEN, MAGIC, VERSION},
        error::FundMeError,
        state::{self, LedgerHeader},
    };

    pub fn header(data: &[u8]) -> Result<LedgerHeader, FundMeError> {
        if data.len() != LEDGER_LEN {
            return Err(FundMeError::InvalidLedgerLen);
        }
        let h = state::read_header(data);
        if h.magic != MAGIC {
            return Err(FundMeError::NotInitialized);
        }
        if h.version != VERSION {
            return Err(FundMeError::InvalidVersion);
        }
        Ok(h)
    }

    pub fn owner(data: &[u8]) -> Result<Pubkey, FundMeError> {
        Ok(Pubkey::new_from_array(header(data)?.owner))
    }

    pub fn is_owner(data: &[u8], key: &Pubkey) -> bool {
        owner(data).map(|owner| owner == *key).unwrap_or(false)
    }

    pub fn price_feed(data: &[u8]) -> Result<Pubkey, FundMeError> {
        Ok(Pubkey::new_from_array(header(data)?.price_feed))
    }

    pub fn funder_count(data: &[u8]) -> Result<usize, FundMeError> {
        Ok(header(data)?.funder_count as usize)
    }

    pub fn total_funded(data: &[u8]) -> Result<u64, FundMeError> {
        Ok(header(data)?.total_funded)
    }

    /// Zero for identities that never funded or were reset by a withdrawal.
    pub fn amount_funded(data: &[u8], funder: &Pubkey) -> Result<u64, FundMeError> {
        let h = header(data)?;
        Ok(state::find_funder(data, h.funder_count as usize, funder)
            .map(|i| state::read_entry(data, i).amount)
            .unwrap_or(0))
    }

    pub fn funder(data: &[u8], index: usize) -> Result<Pubkey, FundMeError> {
        let h = header(data)?;
        if index >= h.funder_count as usize {
            return Err(FundMeError::IndexOutOfRange);
        }
        Ok(Pubkey::new_from_array(state::read_entry(data, index).key))
    }

    pub fn funders(data: &[u8]) -> Result<Vec<(Pubkey, u64)>, FundMeError> {
        let h = header(data)?;
        Ok((0..h.funder_count as usize)
            .map(|i| {
                let e = state::read_entry(data, i);
                (Pubkey::new_from_array(e.key), e.amount)
            })
            .collect())
    }

    pub fn held_balance(data: &[u8], lamports: u64) -> Result<u64, FundMeError> {
        Ok(state::held_balance(lamports, &header(data)?))
    }
}

// 12. mod config
/// Cluster table and mock-feed defaults for deployments.
pub mod config {
    use core::str::FromStr;
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};
    use crate::{constants::FEED_LEN, error::FundMeError, oracle};

    pub const MOCK_DECIMALS: u8 = 8;
    pub const MOCK_INITIAL_ANSWER: i128 = 200_000_000_000;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Cluster {
        Localnet,
        Devnet,
        Testnet,
        MainnetBeta,
    }

    impl Cluster {
        pub fn name(&self) -> &'static str {
            match self {
                Cluster::Localnet => "localnet",
                Cluster::Devnet => "devnet",
                Cluster::Testnet => "testnet",
                Cluster::MainnetBeta => "mainnet-beta",
            }
        }

        /// Development clusters run against a mock feed.
        pub fn is_development(&self) -> bool {
            matches!(self, Cluster::Localnet)
        }
    }

    impl core::fmt::Display for Cluster {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.write_str(self.name())
        }
    }

    impl FromStr for Cluster {
        type Err = ProgramError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "localnet" | "localhost" | "local" => Ok(Cluster::Localnet),
                "devnet" => Ok(Cluster::Devnet),
                "testnet" => Ok(Cluster::Testnet),
                "mainnet" | "mainnet-beta" => Ok(Cluster::MainnetBeta),
                _ => Err(ProgramError::InvalidArgument),
            }
        }
    }

    /// Feed key to pass to `Initialize`.
    pub fn resolve_price_feed(
        cluster: Cluster,
        configured: Option<Pubkey>,
        mock: Option<Pubkey>,
    ) -> Result<Pubkey, FundMeError> {
        if cluster.is_development() {
            mock.or(configured).ok_or(FundMeError::MissingPriceFeed)
        } else {
            configured.ok_or(FundMeError::MissingPriceFeed)
        }
    }

    pub fn mock_feed_data(updated_at: i64) -> [u8; FEED_LEN] {
        oracle::encode_feed(MOCK_DECIMALS, 1, MOCK_INITIAL_ANSWER, updated_at)
    }
}

// 13. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
#[allow(unsafe_code)]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult,
        program_error::PrintProgramError, pubkey::Pubkey,
    };
    use crate::{error::FundMeError, processor};

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
            error.print::<FundMeError>();
            return Err(error);
        }
        Ok(())
    }
}
