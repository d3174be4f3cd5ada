//! The authentication-and-dashboard user journey.
//!
//! One iteration walks the funnel a real user walks: look up the profile,
//! log in, then load the four dashboard resources with the issued token. A
//! failed call short-circuits everything that depends on it, but the
//! iteration itself always completes; failures only degrade metrics.
//!
//! Per call, the journey records a dedicated latency Trend, a pass/fail
//! trial in the error Rate, and a success Counter. One extra Counter,
//! [`TRANSACTION_COUNTER`], increments only when the entire chain passed.

use serde_json::json;

use crate::identity::Identity;
use crate::user::{ApiResponse, VirtualUser};

/// Path of the profile lookup endpoint.
pub const PROFILE_PATH: &str = "/api/v1/get-user-by-id";
/// Path of the login endpoint.
pub const LOGIN_PATH: &str = "/api/v1/login";
/// Path of the accounts dashboard endpoint.
pub const ACCOUNTS_PATH: &str = "/api/v1/get-user-accounts";
/// Path of the debit cards dashboard endpoint.
pub const DEBIT_CARDS_PATH: &str = "/api/v1/get-user-debit-cards";
/// Path of the saved accounts dashboard endpoint.
pub const SAVED_ACCOUNTS_PATH: &str = "/api/v1/get-user-saved-accounts";
/// Path of the banners dashboard endpoint.
pub const BANNERS_PATH: &str = "/api/v1/get-user-banners";

/// Latency Trend for the profile lookup.
pub const GET_USER_TREND: &str = "get_user_response_time";
/// Latency Trend for the login call.
pub const LOGIN_TREND: &str = "login_response_time";
/// Latency Trend for the accounts fetch.
pub const ACCOUNTS_TREND: &str = "get_user_accounts_response_time";
/// Latency Trend for the debit cards fetch.
pub const DEBIT_CARDS_TREND: &str = "get_user_debit_cards_response_time";
/// Latency Trend for the saved accounts fetch.
pub const SAVED_ACCOUNTS_TREND: &str = "get_user_saved_accounts_response_time";
/// Latency Trend for the banners fetch.
pub const BANNERS_TREND: &str = "get_user_banners_response_time";

/// Rate of failed checks across all calls.
pub const ERROR_RATE: &str = "error_rate";

/// Counter of profile lookups that passed their checks.
pub const SUCCESSFUL_GET_USER: &str = "successful_get_user";
/// Counter of logins that passed their checks.
pub const SUCCESSFUL_LOGIN: &str = "successful_login";
/// Counter of accounts fetches that passed their checks.
pub const SUCCESSFUL_GET_USER_ACCOUNTS: &str = "successful_get_user_accounts";
/// Counter of debit cards fetches that passed their checks.
pub const SUCCESSFUL_GET_USER_DEBIT_CARDS: &str = "successful_get_user_debit_cards";
/// Counter of saved accounts fetches that passed their checks.
pub const SUCCESSFUL_GET_USER_SAVED_ACCOUNTS: &str = "successful_get_user_saved_accounts";
/// Counter of banners fetches that passed their checks.
pub const SUCCESSFUL_GET_USER_BANNERS: &str = "successful_get_user_banners";

/// Counter of complete auth-plus-dashboard chains: all six calls passed.
pub const TRANSACTION_COUNTER: &str = "transaction_counter";

/// Run one full iteration of the journey.
pub async fn run_iteration(user: &mut VirtualUser) {
    let identity = user.pick_identity();

    // A failed profile lookup short-circuits the rest of the chain.
    if !fetch_profile(user, &identity).await {
        return;
    }

    // A failed login short-circuits the dashboard fetches.
    let token = match login(user, &identity).await {
        Some(token) => token,
        None => return,
    };

    // The four dashboard fetches are independent of each other: all four run,
    // in order, whatever their individual outcomes.
    let accounts = fetch_resource(
        user,
        ACCOUNTS_PATH,
        ACCOUNTS_TREND,
        SUCCESSFUL_GET_USER_ACCOUNTS,
        &token,
    )
    .await;
    let debit_cards = fetch_resource(
        user,
        DEBIT_CARDS_PATH,
        DEBIT_CARDS_TREND,
        SUCCESSFUL_GET_USER_DEBIT_CARDS,
        &token,
    )
    .await;
    let saved_accounts = fetch_resource(
        user,
        SAVED_ACCOUNTS_PATH,
        SAVED_ACCOUNTS_TREND,
        SUCCESSFUL_GET_USER_SAVED_ACCOUNTS,
        &token,
    )
    .await;
    let banners = fetch_resource(
        user,
        BANNERS_PATH,
        BANNERS_TREND,
        SUCCESSFUL_GET_USER_BANNERS,
        &token,
    )
    .await;

    // Only a fully successful chain counts as a transaction.
    if accounts && debit_cards && saved_accounts && banners {
        let tags = user.tags.clone();
        user.sink.add_count(TRANSACTION_COUNTER, &tags, 1);
    }
}

// Record the shared per-call bookkeeping: latency trend, error rate trial,
// and on success the call's counter.
fn record_call(user: &mut VirtualUser, trend: &str, counter: &str, response: &ApiResponse, ok: bool) {
    let tags = user.tags.clone();
    user.sink.add_time(trend, &tags, response.response_time_ms);
    user.sink.add_rate(ERROR_RATE, &tags, !ok);
    if ok {
        user.sink.add_count(counter, &tags, 1);
    }
}

// Look up the profile for an identity. Passes when the response is a 200
// whose body carries a usable user_info name.
async fn fetch_profile(user: &mut VirtualUser, identity: &Identity) -> bool {
    let payload = json!({ "user_id": identity.user_id });
    let response = user.post_json(PROFILE_PATH, &payload).await;
    let ok = response.check("/data/user_info/name");
    record_call(user, GET_USER_TREND, SUCCESSFUL_GET_USER, &response, ok);
    ok
}

// Authenticate an identity and return the issued bearer token.
async fn login(user: &mut VirtualUser, identity: &Identity) -> Option<String> {
    let payload = json!({ "user_id": identity.user_id, "pin": identity.pin });
    let response = user.post_json(LOGIN_PATH, &payload).await;
    let token = response.string_at("/data/token").filter(|token| !token.is_empty());
    let ok = response.check("/data/token") && token.is_some();
    record_call(user, LOGIN_TREND, SUCCESSFUL_LOGIN, &response, ok);
    if ok {
        token
    } else {
        None
    }
}

// Fetch one dashboard resource with the bearer token. Passes when the
// response is a 200 whose body contains a data field, even a null one.
async fn fetch_resource(
    user: &mut VirtualUser,
    path: &str,
    trend: &str,
    counter: &str,
    token: &str,
) -> bool {
    let response = user.get_with_bearer(path, token).await;
    let ok = response.check_present("/data");
    record_call(user, trend, counter, &response, ok);
    ok
}
