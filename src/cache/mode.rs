//! Directive evaluation that gates the sync pipeline.

/// Raw directives from flags and environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Directives {
  /// Never touch the network
  pub offline: bool,
  /// Neither read nor write the cache file
  pub no_cache: bool,
  /// Ignore the stored ETag and the TTL
  pub refresh: bool,
  /// Offline without detail prefetch
  pub fast: bool,
  pub prefetch_details: bool,
  pub show_checks: bool,
}

impl Directives {
  /// Combine two directive sets; a directive is on if either side sets it.
  pub fn or(self, other: Self) -> Self {
    Self {
      offline: self.offline || other.offline,
      no_cache: self.no_cache || other.no_cache,
      refresh: self.refresh || other.refresh,
      fast: self.fast || other.fast,
      prefetch_details: self.prefetch_details || other.prefetch_details,
      show_checks: self.show_checks || other.show_checks,
    }
  }

  pub fn plan(self) -> Plan {
    let network = !(self.offline || self.fast);
    Plan {
      network,
      persist: !self.no_cache,
      force_refresh: network && self.refresh,
      prefetch_details: network && self.prefetch_details,
      fetch_checks: network && self.show_checks,
    }
  }
}

/// What the pipeline is allowed to do for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
  /// Conditional fetch, closed supplement and prefetch may run
  pub network: bool,
  /// The cache file is read and written
  pub persist: bool,
  pub force_refresh: bool,
  pub prefetch_details: bool,
  pub fetch_checks: bool,
}

impl Plan {
  /// Whether the detail prefetcher has anything to do.
  pub fn wants_prefetch(&self) -> bool {
    self.prefetch_details || self.fetch_checks
  }
}
