// Shared fixtures for fetcher and pipeline tests
