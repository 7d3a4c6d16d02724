// End-to-end runs of the full pipeline against the simulated dual-slot table.

mod scenarios;
