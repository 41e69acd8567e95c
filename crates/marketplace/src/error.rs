use compute_protocol::{BidId, DomainError, ErrorKind, MatchId, OfferId};

#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    #[error("offer {0} not found")]
    UnknownOffer(OfferId),
    #[error("bid {0} not found")]
    UnknownBid(BidId),
    #[error("match {0} not found")]
    UnknownMatch(MatchId),
    #[error("offer {0} is no longer open")]
    OfferNotOpen(OfferId),
    #[error("bid {0} is no longer open")]
    BidNotOpen(BidId),
    #[error("match {0} is not awaiting confirmation")]
    MatchNotProposed(MatchId),
}

impl From<MarketplaceError> for DomainError {
    fn from(err: MarketplaceError) -> Self {
        match err {
            MarketplaceError::UnknownOffer(_)
            | MarketplaceError::UnknownBid(_)
            | MarketplaceError::UnknownMatch(_) => DomainError::new(ErrorKind::NotFound, err.to_string()),
            MarketplaceError::OfferNotOpen(_)
            | MarketplaceError::BidNotOpen(_)
            | MarketplaceError::MatchNotProposed(_) => DomainError::new(ErrorKind::Conflict, err.to_string()),
        }
    }
}
