mod prediction_tests;
mod simulation_tests;
