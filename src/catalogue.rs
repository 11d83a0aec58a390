//! Static catalogue of remote operations, grouped by API family.
//!
//! The `catalogue!` table below is the only place an operation is declared.
//! It expands into the [`Operation`] enum and one typed method per entry on
//! [`Session`], each of which forwards to [`Session::invoke`].

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::session::{PendingCall, Session, SessionError};

/// Logical grouping of remote operations, each served by its own endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ApiFamily {
    Betting,
    Accounts,
    Heartbeat,
    Scores,
}

impl ApiFamily {
    pub const ALL: [ApiFamily; 4] = [
        ApiFamily::Betting,
        ApiFamily::Accounts,
        ApiFamily::Heartbeat,
        ApiFamily::Scores,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Betting => "betting",
            Self::Accounts => "accounts",
            Self::Heartbeat => "heartbeat",
            Self::Scores => "scores",
        }
    }

    /// Prefix prepended to an operation name to form the JSON-RPC method.
    pub const fn rpc_prefix(self) -> &'static str {
        match self {
            Self::Betting => "SportsAPING/v1.0/",
            Self::Accounts => "AccountAPING/v1.0/",
            Self::Heartbeat => "HeartbeatAPING/v1.0/",
            Self::Scores => "ScoresAPING/v1.0/",
        }
    }

    /// Operations belonging to this family, in catalogue order.
    pub fn operations(self) -> impl Iterator<Item = Operation> {
        Operation::ALL
            .iter()
            .copied()
            .filter(move |operation| operation.family() == self)
    }
}

impl fmt::Display for ApiFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! catalogue {
    ($($family:ident { $($variant:ident => $method:ident, $name:literal;)+ })+) => {
        /// One remote operation from the catalogue.
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
        pub enum Operation {
            $($($variant,)+)+
        }

        impl Operation {
            /// Every catalogue entry, grouped by family.
            pub const ALL: &'static [Operation] = &[$($(Operation::$variant,)+)+];

            /// Remote operation name, e.g. `listEventTypes`.
            pub const fn name(self) -> &'static str {
                match self {
                    $($(Operation::$variant => $name,)+)+
                }
            }

            pub const fn family(self) -> ApiFamily {
                match self {
                    $($(Operation::$variant => ApiFamily::$family,)+)+
                }
            }
        }

        impl Session {
            $($(
                #[doc = concat!("Calls `", $name, "` on the ", stringify!($family), " API.")]
                ///
                /// Fails immediately with [`SessionError::Validation`] when
                /// `params` does not serialize to a JSON object.
                pub fn $method<P>(&self, params: &P) -> Result<PendingCall, SessionError>
                where
                    P: Serialize + ?Sized,
                {
                    self.invoke(Operation::$variant, params)
                }
            )+)+
        }
    };
}

catalogue! {
    Betting {
        ListEventTypes => list_event_types, "listEventTypes";
        ListCompetitions => list_competitions, "listCompetitions";
        ListTimeRanges => list_time_ranges, "listTimeRanges";
        ListEvents => list_events, "listEvents";
        ListMarketTypes => list_market_types, "listMarketTypes";
        ListCountries => list_countries, "listCountries";
        ListVenues => list_venues, "listVenues";
        ListMarketCatalogue => list_market_catalogue, "listMarketCatalogue";
        ListMarketBook => list_market_book, "listMarketBook";
        ListMarketProfitAndLoss => list_market_profit_and_loss, "listMarketProfitAndLoss";
        ListCurrentOrders => list_current_orders, "listCurrentOrders";
        ListClearedOrders => list_cleared_orders, "listClearedOrders";
        PlaceOrders => place_orders, "placeOrders";
        CancelOrders => cancel_orders, "cancelOrders";
        ReplaceOrders => replace_orders, "replaceOrders";
        UpdateOrders => update_orders, "updateOrders";
    }
    Accounts {
        CreateDeveloperAppKeys => create_developer_app_keys, "createDeveloperAppKeys";
        GetAccountDetails => get_account_details, "getAccountDetails";
        GetAccountFunds => get_account_funds, "getAccountFunds";
        GetDeveloperAppKeys => get_developer_app_keys, "getDeveloperAppKeys";
        GetAccountStatement => get_account_statement, "getAccountStatement";
        ListCurrencyRates => list_currency_rates, "listCurrencyRates";
        TransferFunds => transfer_funds, "transferFunds";
    }
    Heartbeat {
        Heartbeat => heartbeat, "heartbeat";
    }
    Scores {
        ListRaceDetails => list_race_details, "listRaceDetails";
        ListScores => list_scores, "listScores";
        ListIncidents => list_incidents, "listIncidents";
        ListAvailableEvents => list_available_events, "listAvailableEvents";
    }
}

impl Operation {
    /// Fully qualified JSON-RPC method, e.g. `SportsAPING/v1.0/listEventTypes`.
    pub fn rpc_method(self) -> String {
        format!("{}{}", self.family().rpc_prefix(), self.name())
    }

    /// Operations that change exchange or account state and must not be
    /// replayed by a transport.
    pub const fn is_transactional(self) -> bool {
        matches!(
            self,
            Self::PlaceOrders
                | Self::CancelOrders
                | Self::ReplaceOrders
                | Self::UpdateOrders
                | Self::TransferFunds
                | Self::CreateDeveloperAppKeys
                | Self::Heartbeat
        )
    }

    /// Operations a transport may hand to an emulation provider when they
    /// target an emulated market.
    pub const fn is_emulatable(self) -> bool {
        matches!(
            self,
            Self::PlaceOrders
                | Self::CancelOrders
                | Self::ReplaceOrders
                | Self::UpdateOrders
                | Self::ListMarketBook
                | Self::ListCurrentOrders
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|operation| operation.name() == name)
            .ok_or_else(|| UnknownOperation(name.to_string()))
    }
}
